//! Child normalization - flattening fragments and providers.
//!
//! The differ works on flat lists of concrete items (intrinsic, component,
//! text). Fragments splice their children in place; providers do the same
//! but wrap their subtree's items in a fresh frame parented on the frame
//! current where the provider sits. Components are NOT rendered here -
//! matching decides first whether an existing instance is reused.

use std::rc::Rc;

use crate::context::ContextFrame;
use crate::error::RenderError;
use crate::vnode::{ComponentNode, IntrinsicNode, VNode};

/// A concrete child: no fragments, no providers.
pub(crate) enum ConcreteNode {
    Intrinsic(IntrinsicNode),
    Component(ComponentNode),
    Text(String),
}

/// A normalized child plus the context frame its subtree renders under.
pub(crate) struct NormItem {
    pub vnode: ConcreteNode,
    pub frame: Rc<ContextFrame>,
}

impl core::fmt::Debug for NormItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NormItem").field("key", &self.key()).finish()
    }
}

impl NormItem {
    pub fn key(&self) -> Option<&str> {
        match &self.vnode {
            ConcreteNode::Intrinsic(n) => n.key.as_deref(),
            ConcreteNode::Component(n) => n.key.as_deref(),
            ConcreteNode::Text(_) => None,
        }
    }
}

/// Flatten `children` into concrete items under `frame`.
pub(crate) fn normalize_children(
    children: &[VNode],
    frame: &Rc<ContextFrame>,
    out: &mut Vec<NormItem>,
) {
    for child in children {
        match child {
            VNode::Fragment(kids) => normalize_children(kids, frame, out),
            VNode::Provider(provider) => {
                let inner =
                    ContextFrame::with_value(frame.clone(), provider.context, provider.value.clone());
                normalize_children(&provider.children, &inner, out);
            }
            VNode::Intrinsic(n) => out.push(NormItem {
                vnode: ConcreteNode::Intrinsic(n.clone()),
                frame: frame.clone(),
            }),
            VNode::Component(c) => out.push(NormItem {
                vnode: ConcreteNode::Component(c.clone()),
                frame: frame.clone(),
            }),
            VNode::Text(data) => out.push(NormItem {
                vnode: ConcreteNode::Text(data.clone()),
                frame: frame.clone(),
            }),
        }
    }
}

/// Normalize a component's output, which must resolve to exactly one
/// concrete root (fragment/provider wrappers are fine).
pub(crate) fn normalize_single(
    output: &VNode,
    frame: &Rc<ContextFrame>,
) -> Result<NormItem, RenderError> {
    let mut items = Vec::with_capacity(1);
    normalize_children(std::slice::from_ref(output), frame, &mut items);
    if items.len() != 1 {
        return Err(RenderError::MultipleRoots { count: items.len() });
    }
    Ok(items.pop().unwrap())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::define_context;
    use crate::vnode::{el, fragment, text};

    #[test]
    fn test_fragments_flatten() {
        let frame = ContextFrame::root();
        let tree = vec![
            text("a"),
            fragment([text("b"), fragment([text("c")])]),
            el("div").into(),
        ];

        let mut items = Vec::new();
        normalize_children(&tree, &frame, &mut items);
        assert_eq!(items.len(), 4);
        assert!(matches!(items[0].vnode, ConcreteNode::Text(_)));
        assert!(matches!(items[3].vnode, ConcreteNode::Intrinsic(_)));
    }

    #[test]
    fn test_provider_wraps_descendant_frames() {
        let ctx = define_context(0i64);
        let frame = ContextFrame::root();
        let tree = vec![text("outside"), ctx.provide(7, [text("inside")])];

        let mut items = Vec::new();
        normalize_children(&tree, &frame, &mut items);
        assert_eq!(items.len(), 2);

        assert!(items[0].frame.lookup(ctx.id()).is_none());
        let provided = items[1].frame.lookup(ctx.id()).unwrap();
        assert_eq!(*provided.downcast::<i64>().unwrap(), 7);
    }

    #[test]
    fn test_single_root_required() {
        let frame = ContextFrame::root();
        assert!(normalize_single(&text("one"), &frame).is_ok());

        let err = normalize_single(&fragment([text("a"), text("b")]), &frame).unwrap_err();
        assert!(matches!(err, RenderError::MultipleRoots { count: 2 }));

        let err = normalize_single(&fragment([]), &frame).unwrap_err();
        assert!(matches!(err, RenderError::MultipleRoots { count: 0 }));
    }
}
