//! Bounded-depth family tree used to block intra-family marriage

use super::types::ActorId;
use crate::bus::ChannelHandler;
use crate::error::{HandlerFailure, RelayerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A node of the relationship graph, as carried on `TreeMemberUpdate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilyTreeMember {
    pub discord_id: ActorId,
    #[serde(default)]
    pub children: Vec<ActorId>,
    #[serde(default)]
    pub parent_id: Option<ActorId>,
    #[serde(default)]
    pub partner_id: Option<ActorId>,
}

impl FamilyTreeMember {
    pub fn new(discord_id: ActorId) -> Self {
        Self {
            discord_id,
            children: Vec::new(),
            parent_id: None,
            partner_id: None,
        }
    }

    /// Every actor one edge away
    pub fn relatives(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.partner_id
            .into_iter()
            .chain(self.parent_id)
            .chain(self.children.iter().copied())
    }
}

/// Actors reachable from `root` within `max_depth` hops
#[derive(Debug, Clone)]
pub struct FamilyTree {
    root: ActorId,
    max_depth: u32,
    distances: HashMap<ActorId, u32>,
}

impl FamilyTree {
    pub fn root(&self) -> ActorId {
        self.root
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.distances.contains_key(&actor)
    }

    /// Hop count from the root, if the actor is in the tree
    pub fn distance(&self, actor: ActorId) -> Option<u32> {
        self.distances.get(&actor).copied()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

#[async_trait]
pub trait RelationshipGraph: Send + Sync {
    async fn build_tree(&self, root: ActorId, max_depth: u32) -> RelayerResult<FamilyTree>;

    /// Record a committed marriage (`Some`) or divorce (`None`) for `actor`
    /// and return the member as it now stands
    async fn set_partner(
        &self,
        actor: ActorId,
        partner: Option<ActorId>,
    ) -> RelayerResult<FamilyTreeMember>;
}

/// Backing lookup for members not yet cached
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn tree_member(&self, actor: ActorId) -> RelayerResult<Option<FamilyTreeMember>>;
}

/// Member cache kept fresh by `TreeMemberUpdate` messages
pub struct TreeCache {
    members: DashMap<ActorId, FamilyTreeMember>,
    store: Option<Arc<dyn MemberStore>>,
}

impl TreeCache {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self {
            members: DashMap::new(),
            store: Some(store),
        }
    }

    /// Cache with no backing store; uncached members have no relatives
    pub fn in_memory() -> Self {
        Self {
            members: DashMap::new(),
            store: None,
        }
    }

    pub fn upsert(&self, member: FamilyTreeMember) {
        self.members.insert(member.discord_id, member);
    }

    pub fn cached(&self, actor: ActorId) -> Option<FamilyTreeMember> {
        self.members.get(&actor).map(|m| m.clone())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    async fn member(&self, actor: ActorId) -> RelayerResult<Option<FamilyTreeMember>> {
        if let Some(member) = self.cached(actor) {
            return Ok(Some(member));
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };

        let fetched = store.tree_member(actor).await?;
        if let Some(member) = &fetched {
            self.upsert(member.clone());
        }
        Ok(fetched)
    }
}

#[async_trait]
impl RelationshipGraph for TreeCache {
    async fn build_tree(&self, root: ActorId, max_depth: u32) -> RelayerResult<FamilyTree> {
        let mut distances = HashMap::from([(root, 0)]);
        let mut queue = VecDeque::from([(root, 0u32)]);

        while let Some((actor, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(member) = self.member(actor).await? else {
                continue;
            };
            for relative in member.relatives() {
                if !distances.contains_key(&relative) {
                    distances.insert(relative, depth + 1);
                    queue.push_back((relative, depth + 1));
                }
            }
        }

        debug!(
            "Built family tree for {} with {} members (depth {})",
            root,
            distances.len(),
            max_depth
        );

        Ok(FamilyTree {
            root,
            max_depth,
            distances,
        })
    }

    async fn set_partner(
        &self,
        actor: ActorId,
        partner: Option<ActorId>,
    ) -> RelayerResult<FamilyTreeMember> {
        let mut member = self
            .member(actor)
            .await?
            .unwrap_or_else(|| FamilyTreeMember::new(actor));
        member.partner_id = partner;
        self.upsert(member.clone());
        Ok(member)
    }
}

#[async_trait]
impl ChannelHandler for TreeCache {
    type Payload = FamilyTreeMember;

    async fn handle(&self, member: FamilyTreeMember) -> Result<(), HandlerFailure> {
        debug!("Refreshing cached tree member {}", member.discord_id);
        self.upsert(member);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A straight parent chain 1 <- 2 <- 3 ... (each is the child of the previous)
    fn lineage(len: u64) -> TreeCache {
        let cache = TreeCache::in_memory();
        for id in 1..=len {
            cache.upsert(FamilyTreeMember {
                discord_id: id,
                children: if id < len { vec![id + 1] } else { vec![] },
                parent_id: if id > 1 { Some(id - 1) } else { None },
                partner_id: None,
            });
        }
        cache
    }

    #[tokio::test]
    async fn test_depth_bound_is_inclusive() {
        let cache = lineage(10);
        let tree = cache.build_tree(1, 6).await.unwrap();

        assert!(tree.contains(1));
        assert_eq!(tree.distance(7), Some(6));
        assert!(!tree.contains(8));
        assert_eq!(tree.len(), 7);
    }

    #[tokio::test]
    async fn test_walks_partner_and_parent_edges() {
        let cache = TreeCache::in_memory();
        cache.upsert(FamilyTreeMember {
            discord_id: 1,
            children: vec![],
            parent_id: Some(10),
            partner_id: Some(2),
        });
        cache.upsert(FamilyTreeMember {
            discord_id: 10,
            children: vec![1, 11],
            parent_id: None,
            partner_id: None,
        });

        let tree = cache.build_tree(1, 6).await.unwrap();
        assert_eq!(tree.distance(2), Some(1));
        assert_eq!(tree.distance(10), Some(1));
        assert_eq!(tree.distance(11), Some(2));
    }

    #[tokio::test]
    async fn test_uncached_members_fetched_once_from_store() {
        let mut store = MockMemberStore::new();
        store
            .expect_tree_member()
            .withf(|actor| *actor == 1)
            .times(1)
            .returning(|_| {
                Ok(Some(FamilyTreeMember {
                    discord_id: 1,
                    children: vec![],
                    parent_id: None,
                    partner_id: Some(2),
                }))
            });
        store
            .expect_tree_member()
            .withf(|actor| *actor == 2)
            .times(1)
            .returning(|_| Ok(None));

        let cache = TreeCache::new(Arc::new(store));
        let tree = cache.build_tree(1, 6).await.unwrap();
        assert!(tree.contains(2));
        assert!(cache.cached(1).is_some());

        // Second build hits the cache for actor 1
        cache.build_tree(1, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_handler_refreshes_cache() {
        let cache = TreeCache::in_memory();
        cache.upsert(FamilyTreeMember::new(5));

        let payload: FamilyTreeMember = serde_json::from_value(serde_json::json!({
            "discord_id": 5,
            "children": [6],
            "parent_id": null,
            "partner_id": 7
        }))
        .unwrap();
        cache.handle(payload).await.unwrap();

        let member = cache.cached(5).unwrap();
        assert_eq!(member.partner_id, Some(7));
        assert_eq!(member.children, vec![6]);
    }

    #[tokio::test]
    async fn test_set_partner_keeps_other_edges() {
        let cache = lineage(3);

        let member = cache.set_partner(2, Some(9)).await.unwrap();
        assert_eq!(member.partner_id, Some(9));
        assert_eq!(member.parent_id, Some(1));
        assert_eq!(member.children, vec![3]);
        assert!(cache.build_tree(1, 2).await.unwrap().contains(9));

        cache.set_partner(2, None).await.unwrap();
        assert!(!cache.build_tree(1, 6).await.unwrap().contains(9));

        // Unknown actors get a fresh entry
        assert_eq!(cache.set_partner(40, Some(41)).await.unwrap().partner_id, Some(41));
        assert!(cache.cached(40).is_some());
    }

    #[test]
    fn test_member_schema_rejects_unknown_fields() {
        let result: Result<FamilyTreeMember, _> =
            serde_json::from_str(r#"{"discord_id": 1, "nickname": "x"}"#);
        assert!(result.is_err());
    }
}
