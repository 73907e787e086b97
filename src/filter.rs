use crate::id_mask::IdMask;
use crate::osm::{OsmNode, OsmRelation, OsmWay};
use crate::pipeline::Handler;
use anyhow::Result;

/// Which id of a way is tested against the way index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WayMatch {
    /// The way's own id.
    #[default]
    Id,
    /// Any of the node ids the way references.
    AnyRef,
}

/// Forwards a primitive to the inner handler only when its id is marked.
///
/// A kind without an index is never forwarded.
pub struct IdFilter<'a, H> {
    inner: H,
    nodes: Option<&'a IdMask>,
    ways: Option<&'a IdMask>,
    relations: Option<&'a IdMask>,
    way_match: WayMatch,
}

impl<'a, H: Handler> IdFilter<'a, H> {
    pub fn new(inner: H) -> Self {
        IdFilter {
            inner,
            nodes: None,
            ways: None,
            relations: None,
            way_match: WayMatch::Id,
        }
    }

    pub fn nodes(mut self, mask: &'a IdMask) -> Self {
        self.nodes = Some(mask);
        self
    }

    pub fn ways(mut self, mask: &'a IdMask, way_match: WayMatch) -> Self {
        self.ways = Some(mask);
        self.way_match = way_match;
        self
    }

    pub fn relations(mut self, mask: &'a IdMask) -> Self {
        self.relations = Some(mask);
        self
    }
}

impl<H: Handler> Handler for IdFilter<'_, H> {
    fn node(&self, node: &OsmNode) -> Result<()> {
        match self.nodes {
            Some(mask) if mask.contains(node.id) => self.inner.node(node),
            _ => Ok(()),
        }
    }

    fn way(&self, way: &OsmWay) -> Result<()> {
        let Some(mask) = self.ways else {
            return Ok(());
        };
        let hit = match self.way_match {
            WayMatch::Id => mask.contains(way.id),
            WayMatch::AnyRef => way.node_refs.iter().any(|&id| mask.contains(id)),
        };
        if hit { self.inner.way(way) } else { Ok(()) }
    }

    fn relation(&self, relation: &OsmRelation) -> Result<()> {
        match self.relations {
            Some(mask) if mask.contains(relation.id) => self.inner.relation(relation),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Handler for Recorder {
        fn node(&self, node: &OsmNode) -> Result<()> {
            self.seen.lock().unwrap().push(format!("n{}", node.id));
            Ok(())
        }

        fn way(&self, way: &OsmWay) -> Result<()> {
            self.seen.lock().unwrap().push(format!("w{}", way.id));
            Ok(())
        }

        fn relation(&self, relation: &OsmRelation) -> Result<()> {
            self.seen.lock().unwrap().push(format!("r{}", relation.id));
            Ok(())
        }
    }

    fn node(id: i64) -> OsmNode {
        OsmNode { id, lat: 0.0, lon: 0.0 }
    }

    fn way(id: i64, refs: Vec<i64>) -> OsmWay {
        OsmWay {
            id,
            node_refs: refs,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn test_forwards_only_marked_nodes() -> Result<()> {
        let mask = IdMask::new();
        mask.mark(2);
        let recorder = Recorder::default();
        let filter = IdFilter::new(&recorder).nodes(&mask);

        filter.node(&node(1))?;
        filter.node(&node(2))?;
        filter.way(&way(2, vec![2]))?;
        filter.relation(&OsmRelation {
            id: 2,
            tags: HashMap::new(),
        })?;

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["n2"]);
        Ok(())
    }

    #[test]
    fn test_way_match_modes() -> Result<()> {
        let mask = IdMask::new();
        mask.mark(7);

        let by_id = Recorder::default();
        let filter = IdFilter::new(&by_id).ways(&mask, WayMatch::Id);
        filter.way(&way(7, vec![1]))?;
        filter.way(&way(8, vec![7]))?;
        assert_eq!(*by_id.seen.lock().unwrap(), vec!["w7"]);

        let by_ref = Recorder::default();
        let filter = IdFilter::new(&by_ref).ways(&mask, WayMatch::AnyRef);
        filter.way(&way(7, vec![1]))?;
        filter.way(&way(8, vec![3, 7]))?;
        assert_eq!(*by_ref.seen.lock().unwrap(), vec!["w8"]);
        Ok(())
    }
}
