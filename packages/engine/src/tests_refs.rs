use crate::component::{Component, ComponentClass, Props};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::vnode::{RenderContext, VNodeId};
use vellum_common::Value;
use vellum_dom::MemoryDom;

struct Chip;

impl Component for Chip {
    fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
        let text = rc.props().string("text").unwrap_or_default().to_string();
        let span = rc.element("span");
        rc.inner_text(span, &text)?;
        Ok(span)
    }
}

fn chip_class() -> ComponentClass {
    ComponentClass::new("Chip", |_| Box::new(Chip))
}

fn item_names(props: &Props) -> Vec<String> {
    match props.get("items") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn items(names: &[&str]) -> Value {
    Value::Array(names.iter().map(|n| Value::from(*n)).collect())
}

/// ul of ref'd li elements, one per entry in the "items" prop.
struct RefList;

impl Component for RefList {
    fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
        let ul = rc.element("ul");
        for name in item_names(rc.props()).iter() {
            let li = rc.element("li");
            rc.inner_text(li, name)?;
            rc.reference(li, name)?;
            rc.append(ul, li)?;
        }
        Ok(ul)
    }
}

fn ref_list_class() -> ComponentClass {
    ComponentClass::new("RefList", |_| Box::new(RefList))
}

#[test]
fn test_explicit_ref_resolves_to_the_instance() {
    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&ref_list_class(), Props::new().with("items", items(&["a"])))
        .unwrap();

    let li = engine.get_ref(root, "a").unwrap();
    assert_eq!(engine.instance(li).unwrap().tag(), Some("li"));
    assert_eq!(engine.get_ref(root, "missing"), None);
}

#[test]
fn test_refs_survive_rerenders() {
    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&ref_list_class(), Props::new().with("items", items(&["a", "b"])))
        .unwrap();
    let a = engine.get_ref(root, "a").unwrap();
    let b = engine.get_ref(root, "b").unwrap();

    engine.rerender(root).unwrap();

    assert_eq!(engine.get_ref(root, "a"), Some(a));
    assert_eq!(engine.get_ref(root, "b"), Some(b));
}

#[test]
fn test_reorder_preserves_ref_identity() {
    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(
            &ref_list_class(),
            Props::new().with("items", items(&["a", "b", "c"])),
        )
        .unwrap();
    let a = engine.get_ref(root, "a").unwrap();
    let b = engine.get_ref(root, "b").unwrap();
    let c = engine.get_ref(root, "c").unwrap();

    let report = engine
        .set_props(root, Props::new().with("items", items(&["b", "a", "c"])))
        .unwrap();

    assert_eq!(engine.get_ref(root, "a"), Some(a));
    assert_eq!(engine.get_ref(root, "b"), Some(b));
    assert_eq!(engine.get_ref(root, "c"), Some(c));
    assert!(report.disposed.is_empty());
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(
        engine.dom().to_html(dom),
        "<ul><li>b</li><li>a</li><li>c</li></ul>"
    );
}

#[test]
fn test_dropped_ref_disposes_the_instance() {
    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&ref_list_class(), Props::new().with("items", items(&["a", "b"])))
        .unwrap();
    let b = engine.get_ref(root, "b").unwrap();

    let report = engine
        .set_props(root, Props::new().with("items", items(&["a"])))
        .unwrap();

    assert!(report.disposed.contains(&b));
    assert_eq!(engine.get_ref(root, "b"), None);
    assert!(engine.instance(b).is_none());
}

#[test]
fn test_duplicate_ref_fails_the_pass() {
    struct Dup;
    impl Component for Dup {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let div = rc.element("div");
            let a = rc.element("span");
            let b = rc.element("span");
            rc.reference(a, "x")?;
            rc.reference(b, "x")?;
            rc.append(div, a)?;
            rc.append(div, b)?;
            Ok(div)
        }
    }
    let class = ComponentClass::new("Dup", |_| Box::new(Dup));

    let mut engine = Engine::new(MemoryDom::new());
    let err = engine.render(&class, Props::new()).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRef { name } if name == "x"));
}

#[test]
fn test_unplaced_ref_is_dropped() {
    struct Loose;
    impl Component for Loose {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let div = rc.element("div");
            // named but never appended anywhere
            let stray = rc.element("span");
            rc.reference(stray, "stray")?;
            Ok(div)
        }
    }
    let class = ComponentClass::new("Loose", |_| Box::new(Loose));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine.render(&class, Props::new()).unwrap();
    assert_eq!(engine.get_ref(root, "stray"), None);
}

#[test]
fn test_foreign_ref_survives_passing_through_a_wrapper() {
    // Holder renders a Frame and injects a ref'd chip through its props;
    // Frame places the declared children inside its own div.
    struct Frame;
    impl Component for Frame {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let div = rc.element("div");
            rc.class(div, "frame")?;
            for child in rc.props().children().to_vec() {
                rc.append(div, child)?;
            }
            Ok(div)
        }
    }
    let frame = ComponentClass::new("Frame", |_| Box::new(Frame));

    struct Holder {
        frame: ComponentClass,
    }
    impl Component for Holder {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let text = rc.props().string("text").unwrap_or_default().to_string();
            let chip = rc.component(&chip_class(), Props::new().with("text", text.as_str()))?;
            rc.reference(chip, "chip")?;
            let frame = rc.component(&self.frame, Props::new())?;
            rc.append(frame, chip)?;
            let div = rc.element("div");
            rc.append(div, frame)?;
            Ok(div)
        }
    }
    let frame_for_holder = frame.clone();
    let holder = ComponentClass::new("Holder", move |_| {
        Box::new(Holder {
            frame: frame_for_holder.clone(),
        })
    });

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&holder, Props::new().with("text", "x"))
        .unwrap();
    let chip = engine.get_ref(root, "chip").unwrap();
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><div class=\"frame\"><span>x</span></div></div>"
    );

    engine
        .set_props(root, Props::new().with("text", "y"))
        .unwrap();

    assert_eq!(engine.get_ref(root, "chip"), Some(chip));
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><div class=\"frame\"><span>y</span></div></div>"
    );
}

#[test]
fn test_rerender_on_a_receiver_reroots_at_the_injecting_owner() {
    // Frame places whatever children its owner injected.
    struct Frame;
    impl Component for Frame {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let div = rc.element("div");
            for child in rc.props().children().to_vec() {
                rc.append(div, child)?;
            }
            Ok(div)
        }
    }
    let frame = ComponentClass::new("Frame", |_| Box::new(Frame));

    struct Holder {
        frame: ComponentClass,
    }
    impl Component for Holder {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let chip = rc.component(&chip_class(), Props::new().with("text", "x"))?;
            rc.reference(chip, "chip")?;
            let frame = rc.component(&self.frame, Props::new())?;
            rc.append(frame, chip)?;
            let div = rc.element("div");
            rc.append(div, frame)?;
            Ok(div)
        }
    }
    let frame_for_holder = frame.clone();
    let holder = ComponentClass::new("Holder", move |_| {
        Box::new(Holder {
            frame: frame_for_holder.clone(),
        })
    });

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine.render(&holder, Props::new()).unwrap();
    let chip = engine.get_ref(root, "chip").unwrap();
    let frame_inst = engine.structural_ref(root, "Frame").unwrap();

    // the frame cannot rebuild children it never rendered; the pass runs
    // from the holder instead
    let report = engine.rerender(frame_inst).unwrap();

    assert!(report.disposed.is_empty());
    assert_eq!(engine.get_ref(root, "chip"), Some(chip));
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><div><span>x</span></div></div>"
    );
}

#[test]
fn test_receiver_dropping_a_declared_child_disposes_it() {
    // Picky only places its declared children when told to.
    struct Picky;
    impl Component for Picky {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let keep = rc.props().boolean("keep").unwrap_or(true);
            let div = rc.element("div");
            if keep {
                for child in rc.props().children().to_vec() {
                    rc.append(div, child)?;
                }
            }
            Ok(div)
        }
    }
    let picky = ComponentClass::new("Picky", |_| Box::new(Picky));

    struct Holder {
        picky: ComponentClass,
    }
    impl Component for Holder {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let keep = rc.props().boolean("keep").unwrap_or(true);
            let chip = rc.component(&chip_class(), Props::new().with("text", "x"))?;
            rc.reference(chip, "chip")?;
            let picky = rc.component(&self.picky, Props::new().with("keep", keep))?;
            rc.append(picky, chip)?;
            let div = rc.element("div");
            rc.append(div, picky)?;
            Ok(div)
        }
    }
    let picky_for_holder = picky.clone();
    let holder = ComponentClass::new("Holder", move |_| {
        Box::new(Holder {
            picky: picky_for_holder.clone(),
        })
    });

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&holder, Props::new().with("keep", true))
        .unwrap();
    let chip = engine.get_ref(root, "chip").unwrap();
    let count = engine.instance_count();

    let report = engine
        .set_props(root, Props::new().with("keep", false))
        .unwrap();

    // the chip left the output for good: disposed, ref gone, store shrank
    assert!(report.disposed.contains(&chip));
    assert_eq!(engine.get_ref(root, "chip"), None);
    assert!(engine.instance(chip).is_none());
    assert!(engine.instance_count() < count);
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(engine.dom().to_html(dom), "<div><div></div></div>");
}

#[test]
fn test_structural_refs_reuse_unnamed_components() {
    struct Pair;
    impl Component for Pair {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let div = rc.element("div");
            let first = rc.component(&chip_class(), Props::new().with("text", "1"))?;
            let second = rc.component(&chip_class(), Props::new().with("text", "2"))?;
            rc.append(div, first)?;
            rc.append(div, second)?;
            Ok(div)
        }
    }
    let class = ComponentClass::new("Pair", |_| Box::new(Pair));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine.render(&class, Props::new()).unwrap();

    let first = engine.structural_ref(root, "Chip").unwrap();
    let second = engine.structural_ref(root, "Chip~1").unwrap();
    assert_ne!(first, second);

    let report = engine.rerender(root).unwrap();
    assert_eq!(report.dom_writes, 0);
    assert_eq!(engine.structural_ref(root, "Chip"), Some(first));
    assert_eq!(engine.structural_ref(root, "Chip~1"), Some(second));
}

#[test]
fn test_relocation_reparents_instead_of_rebuilding() {
    struct Mover;
    impl Component for Mover {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let wrapped = rc.props().boolean("wrapped").unwrap_or(false);
            let container = rc.element("div");
            let chip = rc.component(&chip_class(), Props::new().with("text", "a"))?;
            rc.reference(chip, "a")?;
            if wrapped {
                let inner = rc.element("section");
                rc.append(inner, chip)?;
                rc.append(container, inner)?;
            } else {
                rc.append(container, chip)?;
            }
            Ok(container)
        }
    }
    let class = ComponentClass::new("Mover", |_| Box::new(Mover));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&class, Props::new().with("wrapped", false))
        .unwrap();
    let chip = engine.get_ref(root, "a").unwrap();
    let chip_dom = engine.dom_handle(chip).unwrap();

    let report = engine
        .set_props(root, Props::new().with("wrapped", true))
        .unwrap();

    // same instance, same element, new ancestry
    assert_eq!(engine.get_ref(root, "a"), Some(chip));
    assert_eq!(engine.dom_handle(chip).unwrap(), chip_dom);
    assert!(report.relocated.contains(&chip));
    assert!(report.disposed.is_empty());
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><section><span>a</span></section></div>"
    );
}
