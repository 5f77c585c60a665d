/// Kind of a wall-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WallNodeKind {
    Decode,
    PostProcess,
    Display,
}

impl WallNodeKind {
    /// Legal producer/consumer pairings.
    pub fn can_bind_to(self, sink: WallNodeKind) -> bool {
        matches!(
            (self, sink),
            (WallNodeKind::Decode, WallNodeKind::PostProcess)
                | (WallNodeKind::Decode, WallNodeKind::Display)
                | (WallNodeKind::PostProcess, WallNodeKind::Display)
        )
    }

    fn prefix(self) -> &'static str {
        match self {
            WallNodeKind::Decode => "dec",
            WallNodeKind::PostProcess => "pp",
            WallNodeKind::Display => "disp",
        }
    }
}

/// Identity of a node in the wall graph, unique per graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WallNodeId {
    pub kind: WallNodeKind,
    pub dev_id: u32,
    pub stream_id: u32,
}

impl WallNodeId {
    pub fn new(kind: WallNodeKind, dev_id: u32, stream_id: u32) -> Self {
        Self {
            kind,
            dev_id,
            stream_id,
        }
    }

    /// Name used for the underlying runtime node.
    pub fn node_name(&self) -> String {
        format!("{}-{}-{}", self.kind.prefix(), self.dev_id, self.stream_id)
    }
}

impl std::fmt::Display for WallNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_matrix() {
        use WallNodeKind::*;
        assert!(Decode.can_bind_to(PostProcess));
        assert!(Decode.can_bind_to(Display));
        assert!(PostProcess.can_bind_to(Display));
        assert!(!Display.can_bind_to(Decode));
        assert!(!PostProcess.can_bind_to(Decode));
        assert!(!Decode.can_bind_to(Decode));
    }

    #[test]
    fn node_names_are_unique_per_identity() {
        let a = WallNodeId::new(WallNodeKind::Decode, 0, 1);
        let b = WallNodeId::new(WallNodeKind::Decode, 0, 2);
        assert_ne!(a.node_name(), b.node_name());
        assert_eq!(a.node_name(), "dec-0-1");
    }
}
