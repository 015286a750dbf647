//! Virtual nodes - immutable per-render tree descriptions.
//!
//! A render produces a [`VNode`] tree; the reconciler diffs it against the
//! live document. Variants:
//! - [`VNode::Intrinsic`] - a concrete element with tag, props, children
//! - [`VNode::Component`] - a render function plus props
//! - [`VNode::Fragment`] - a transparent child list (flattened by the
//!   reconciler)
//! - [`VNode::Text`] - a text leaf
//! - [`VNode::Provider`] - a context frame boundary (flattened like a
//!   fragment, but its subtree renders under the provided frame)
//!
//! Keys are stable string tokens with meaning only among siblings.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::context::ContextId;
use crate::error::RenderError;
use crate::scope::Scope;
use crate::types::{Listener, PropValue, Props};

/// Result of a component render function.
pub type RenderResult = Result<VNode, RenderError>;

/// A component's render function.
///
/// Identity (the `Rc` allocation) is what the reconciler matches on when
/// deciding whether an instance at a position can be reused.
pub type RenderFn = Rc<dyn Fn(&mut Scope<'_>, &Props) -> RenderResult>;

// =============================================================================
// VNode
// =============================================================================

/// Immutable description of desired structure, produced by a render.
#[derive(Clone)]
pub enum VNode {
    Intrinsic(IntrinsicNode),
    Component(ComponentNode),
    Fragment(Vec<VNode>),
    Text(String),
    Provider(ProviderNode),
}

/// An element description.
#[derive(Clone)]
pub struct IntrinsicNode {
    pub tag: String,
    pub props: Props,
    pub children: Vec<VNode>,
    pub key: Option<String>,
}

/// A component description: render function plus the props to pass it.
#[derive(Clone)]
pub struct ComponentNode {
    pub render: RenderFn,
    pub props: Props,
    pub key: Option<String>,
}

/// A provider boundary: descendants render under a frame holding `value`
/// for `context`, parented on the frame current where the provider sits.
#[derive(Clone)]
pub struct ProviderNode {
    pub context: ContextId,
    pub value: Rc<dyn Any>,
    pub children: Vec<VNode>,
}

impl VNode {
    /// The sibling identity token, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            VNode::Intrinsic(node) => node.key.as_deref(),
            VNode::Component(node) => node.key.as_deref(),
            _ => None,
        }
    }
}

/// Render-function identity: same allocation.
pub fn same_render_fn(a: &RenderFn, b: &RenderFn) -> bool {
    Rc::ptr_eq(a, b)
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNode::Intrinsic(node) => f
                .debug_struct("Intrinsic")
                .field("tag", &node.tag)
                .field("key", &node.key)
                .field("children", &node.children.len())
                .finish(),
            VNode::Component(node) => f
                .debug_struct("Component")
                .field("render", &Rc::as_ptr(&node.render))
                .field("key", &node.key)
                .finish(),
            VNode::Fragment(children) => {
                f.debug_tuple("Fragment").field(&children.len()).finish()
            }
            VNode::Text(data) => f.debug_tuple("Text").field(data).finish(),
            VNode::Provider(node) => f
                .debug_struct("Provider")
                .field("context", &node.context)
                .field("children", &node.children.len())
                .finish(),
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Start an intrinsic element description.
pub fn el(tag: impl Into<String>) -> IntrinsicNode {
    IntrinsicNode {
        tag: tag.into(),
        props: Props::new(),
        children: Vec::new(),
        key: None,
    }
}

/// A text leaf.
pub fn text(data: impl Into<String>) -> VNode {
    VNode::Text(data.into())
}

/// A transparent child list.
pub fn fragment(children: impl IntoIterator<Item = VNode>) -> VNode {
    VNode::Fragment(children.into_iter().collect())
}

/// A component from a render function.
pub fn component(render: impl Fn(&mut Scope<'_>, &Props) -> RenderResult + 'static) -> ComponentNode {
    ComponentNode {
        render: Rc::new(render),
        props: Props::new(),
        key: None,
    }
}

/// A component reusing an existing render function (preserves identity
/// across sibling items and re-renders).
pub fn component_from(render: RenderFn) -> ComponentNode {
    ComponentNode { render, props: Props::new(), key: None }
}

impl IntrinsicNode {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props = self.props.attr(name, value);
        self
    }

    pub fn on(mut self, event: impl Into<String>, listener: Listener) -> Self {
        self.props = self.props.on(event, listener);
        self
    }

    pub fn child(mut self, child: impl Into<VNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = VNode>) -> Self {
        self.children.extend(children);
        self
    }
}

impl ComponentNode {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props = self.props.attr(name, value);
        self
    }

    pub fn props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }
}

impl From<IntrinsicNode> for VNode {
    fn from(node: IntrinsicNode) -> Self {
        VNode::Intrinsic(node)
    }
}

impl From<ComponentNode> for VNode {
    fn from(node: ComponentNode) -> Self {
        VNode::Component(node)
    }
}

impl From<ProviderNode> for VNode {
    fn from(node: ProviderNode) -> Self {
        VNode::Provider(node)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shapes() {
        let node: VNode = el("div")
            .key("row-1")
            .attr("id", "x")
            .child(text("hello"))
            .into();

        match &node {
            VNode::Intrinsic(n) => {
                assert_eq!(n.tag, "div");
                assert_eq!(n.key.as_deref(), Some("row-1"));
                assert_eq!(n.children.len(), 1);
            }
            other => panic!("expected intrinsic, got {other:?}"),
        }
        assert_eq!(node.key(), Some("row-1"));
    }

    #[test]
    fn test_render_fn_identity() {
        let a = component(|_, _| Ok(text("x")));
        let b = a.clone();
        let c = component(|_, _| Ok(text("x")));

        assert!(same_render_fn(&a.render, &b.render));
        assert!(!same_render_fn(&a.render, &c.render));
    }

    #[test]
    fn test_fragment_has_no_key() {
        let node = fragment([text("a"), text("b")]);
        assert_eq!(node.key(), None);
    }
}
