//! Remote document id → local node id.

use cmsgraph_shared::{LocalId, NodeSink};

/// Seed prefix that keeps Cloud CMS ids apart from ids minted for any other
/// source sharing the same content graph.
pub const ID_SEED_PREFIX: &str = "cloudcms-";

/// Map a remote document id to its stable local node id.
pub fn local_id(sink: &dyn NodeSink, remote_id: &str) -> LocalId {
    sink.mint_id(&format!("{ID_SEED_PREFIX}{remote_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn same_remote_id_same_local_id() {
        let sink = RecordingSink::default();
        assert_eq!(local_id(&sink, "docA"), local_id(&sink, "docA"));
    }

    #[test]
    fn distinct_remote_ids_distinct_local_ids() {
        let sink = RecordingSink::default();
        assert_ne!(local_id(&sink, "docA"), local_id(&sink, "docB"));
        assert_ne!(local_id(&sink, "a"), local_id(&sink, "cloudcms-a"));
    }

    #[test]
    fn seed_is_namespaced() {
        let sink = RecordingSink::default();
        assert_eq!(local_id(&sink, "docA"), LocalId::mint("cloudcms-docA"));
        assert_ne!(local_id(&sink, "docA"), LocalId::mint("docA"));
    }
}
