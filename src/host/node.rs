//! Live node variants.

use indexmap::IndexMap;

use crate::types::PropValue;

/// A node in the live tree: an element with a tag, attributes, and ordered
/// children, or a text leaf.
///
/// Children are stored as ids, not owned values, so structural mutation is
/// index surgery in the arena rather than tree rebuilding.
#[derive(Clone, Debug)]
pub enum LiveNode {
    Element {
        tag: String,
        attrs: IndexMap<String, PropValue>,
        children: Vec<super::NodeId>,
    },
    Text {
        data: String,
    },
}

impl LiveNode {
    pub fn element(tag: impl Into<String>) -> Self {
        LiveNode::Element {
            tag: tag.into(),
            attrs: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        LiveNode::Text { data: data.into() }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, LiveNode::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, LiveNode::Text { .. })
    }
}
