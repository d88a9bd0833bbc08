use crate::component::{Component, ComponentClass, Props, State};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::vnode::{RenderContext, VNodeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use vellum_dom::{DomAdapter, MemoryDom};

/// Shared counters a probe component reports its hook calls into.
#[derive(Clone, Default)]
struct HookLog {
    renders: Rc<Cell<u32>>,
    received: Rc<Cell<u32>>,
    mounts: Rc<Cell<u32>>,
    updates: Rc<Cell<u32>>,
    disposals: Rc<Cell<u32>>,
    order: Rc<RefCell<Vec<String>>>,
}

struct Probe {
    name: String,
    log: HookLog,
    rerenders: bool,
}

impl Component for Probe {
    fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
        self.log.renders.set(self.log.renders.get() + 1);
        let text = rc.props().string("text").unwrap_or_default().to_string();
        let span = rc.element("span");
        rc.inner_text(span, &text)?;
        Ok(span)
    }

    fn should_rerender(&self, _new_props: &Props, _state: &State) -> bool {
        self.rerenders
    }

    fn will_receive_props(&self, _current: &Props, _incoming: &Props) {
        self.log.received.set(self.log.received.get() + 1);
    }

    fn did_mount(&self) {
        self.log.mounts.set(self.log.mounts.get() + 1);
        self.log.order.borrow_mut().push(format!("mount:{}", self.name));
    }

    fn did_update(&self, _previous_props: &Props, _previous_state: &State) {
        self.log.updates.set(self.log.updates.get() + 1);
        self.log.order.borrow_mut().push(format!("update:{}", self.name));
    }

    fn dispose(&self) {
        self.log.disposals.set(self.log.disposals.get() + 1);
    }
}

fn probe_class(name: &str, log: &HookLog) -> ComponentClass {
    let log = log.clone();
    let probe_name = name.to_string();
    ComponentClass::new(name, move |_| {
        Box::new(Probe {
            name: probe_name.clone(),
            log: log.clone(),
            rerenders: true,
        })
    })
}

fn frozen_probe_class(name: &str, log: &HookLog) -> ComponentClass {
    let log = log.clone();
    let probe_name = name.to_string();
    ComponentClass::new(name, move |_| {
        Box::new(Probe {
            name: probe_name.clone(),
            log: log.clone(),
            rerenders: false,
        })
    })
}

/// div carrying `data-tint` from props around an inner probe fed `text`.
fn shell_class(name: &str, inner: ComponentClass) -> ComponentClass {
    struct Shell {
        inner: ComponentClass,
    }
    impl Component for Shell {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let tint = rc.props().string("tint").unwrap_or_default().to_string();
            let text = rc.props().string("text").unwrap_or_default().to_string();
            let div = rc.element("div");
            rc.attr(div, "data-tint", &tint)?;
            let child = rc.component(&self.inner, Props::new().with("text", text.as_str()))?;
            rc.append(div, child)?;
            Ok(div)
        }
    }
    ComponentClass::new(name, move |_| {
        Box::new(Shell {
            inner: inner.clone(),
        })
    })
}

#[test]
fn test_did_mount_fires_once_children_first() {
    let log = HookLog::default();
    let class = shell_class("Outer", probe_class("Inner", &log));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&class, Props::new().with("text", "x"))
        .unwrap();
    assert_eq!(log.mounts.get(), 0);

    let body = engine.dom_mut().create_element("body");
    let report = engine.mount(root, body).unwrap();

    assert_eq!(log.mounts.get(), 1);
    // inner mounted before the root
    let inner = engine.structural_ref(root, "Inner").unwrap();
    assert_eq!(report.mounted.first(), Some(&inner));
    assert_eq!(report.mounted.last(), Some(&root));
    assert!(engine.instance(root).unwrap().is_mounted());

    engine.rerender(root).unwrap();
    assert_eq!(log.mounts.get(), 1);
}

#[test]
fn test_did_update_fires_children_first_with_previous_props() {
    struct Seen {
        previous: Rc<RefCell<Vec<String>>>,
    }
    impl Component for Seen {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let text = rc.props().string("text").unwrap_or_default().to_string();
            let span = rc.element("span");
            rc.inner_text(span, &text)?;
            Ok(span)
        }
        fn did_update(&self, previous_props: &Props, _previous_state: &State) {
            self.previous
                .borrow_mut()
                .push(previous_props.string("text").unwrap_or_default().to_string());
        }
    }
    let previous = Rc::new(RefCell::new(Vec::new()));
    let seen = previous.clone();
    let inner = ComponentClass::new("Seen", move |_| {
        Box::new(Seen {
            previous: seen.clone(),
        })
    });
    let outer = shell_class("Outer", inner);

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&outer, Props::new().with("tint", "red").with("text", "1"))
        .unwrap();

    let report = engine
        .set_props(root, Props::new().with("tint", "blue").with("text", "2"))
        .unwrap();

    // the inner probe saw its pre-pass props; both instances updated,
    // children before parents
    assert_eq!(previous.borrow().as_slice(), ["1"]);
    let inner_inst = engine.structural_ref(root, "Seen").unwrap();
    assert_eq!(report.updated, vec![inner_inst, root]);
}

#[test]
fn test_no_writes_means_no_did_update() {
    let log = HookLog::default();
    let class = shell_class("Outer", probe_class("Inner", &log));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&class, Props::new().with("tint", "red").with("text", "x"))
        .unwrap();

    let report = engine.rerender(root).unwrap();

    assert_eq!(report.dom_writes, 0);
    assert!(report.updated.is_empty());
    assert_eq!(log.updates.get(), 0);
}

#[test]
fn test_skipped_subtree_still_gets_owner_decorations() {
    let log = HookLog::default();
    let frozen = frozen_probe_class("Frozen", &log);

    // the owner decorates the child component node itself
    struct Wrap {
        inner: ComponentClass,
    }
    impl Component for Wrap {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let tint = rc.props().string("tint").unwrap_or_default().to_string();
            let div = rc.element("div");
            let child = rc.component(&self.inner, Props::new().with("text", "x"))?;
            rc.attr(child, "data-tint", &tint)?;
            rc.append(div, child)?;
            Ok(div)
        }
    }
    let frozen_for_wrap = frozen.clone();
    let class = ComponentClass::new("Wrap", move |_| {
        Box::new(Wrap {
            inner: frozen_for_wrap.clone(),
        })
    });

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&class, Props::new().with("tint", "red"))
        .unwrap();
    assert_eq!(log.renders.get(), 1);
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><span data-tint=\"red\">x</span></div>"
    );

    let report = engine
        .set_props(root, Props::new().with("tint", "blue"))
        .unwrap();

    // the frozen child never re-rendered, but the owner's attribute landed
    assert_eq!(log.renders.get(), 1);
    assert_eq!(report.dom_writes, 1);
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><span data-tint=\"blue\">x</span></div>"
    );
}

#[test]
fn test_second_mount_is_rejected() {
    let log = HookLog::default();
    let class = probe_class("Solo", &log);

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&class, Props::new().with("text", "x"))
        .unwrap();
    let body = engine.dom_mut().create_element("body");
    engine.mount(root, body).unwrap();

    let err = engine.mount(root, body).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyMounted(i) if i == root));
    assert_eq!(log.mounts.get(), 1);
}

#[test]
fn test_skipped_wrapper_still_updates_injected_children() {
    let frame_renders = Rc::new(Cell::new(0u32));

    // a frozen frame that placed its injected children once and then
    // declines every re-render
    struct FrozenFrame {
        renders: Rc<Cell<u32>>,
    }
    impl Component for FrozenFrame {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            self.renders.set(self.renders.get() + 1);
            let div = rc.element("div");
            for child in rc.props().children().to_vec() {
                rc.append(div, child)?;
            }
            Ok(div)
        }
        fn should_rerender(&self, _new_props: &Props, _state: &State) -> bool {
            false
        }
    }
    let frame = {
        let renders = frame_renders.clone();
        ComponentClass::new("FrozenFrame", move |_| {
            Box::new(FrozenFrame {
                renders: renders.clone(),
            })
        })
    };

    let log = HookLog::default();
    struct Owner {
        frame: ComponentClass,
        chip: ComponentClass,
    }
    impl Component for Owner {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let text = rc.props().string("text").unwrap_or_default().to_string();
            let chip = rc.component(&self.chip, Props::new().with("text", text.as_str()))?;
            rc.reference(chip, "chip")?;
            let frame = rc.component(&self.frame, Props::new())?;
            rc.append(frame, chip)?;
            let div = rc.element("div");
            rc.append(div, frame)?;
            Ok(div)
        }
    }
    let frame_for_owner = frame.clone();
    let chip_for_owner = probe_class("Chip", &log);
    let owner = ComponentClass::new("Owner", move |_| {
        Box::new(Owner {
            frame: frame_for_owner.clone(),
            chip: chip_for_owner.clone(),
        })
    });

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&owner, Props::new().with("text", "1"))
        .unwrap();
    let chip = engine.get_ref(root, "chip").unwrap();
    assert_eq!(frame_renders.get(), 1);
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><div><span>1</span></div></div>"
    );

    let report = engine
        .set_props(root, Props::new().with("text", "2"))
        .unwrap();

    // the frame stayed frozen, but the chip injected through its props
    // re-rendered and updated in place
    assert_eq!(frame_renders.get(), 1);
    assert_eq!(log.renders.get(), 2);
    assert_eq!(report.dom_writes, 1);
    assert_eq!(engine.get_ref(root, "chip"), Some(chip));
    assert_eq!(
        engine.dom().to_html(dom),
        "<div><div><span>2</span></div></div>"
    );
}

#[test]
fn test_will_receive_props_fires_for_rerendered_children() {
    let log = HookLog::default();
    let class = shell_class("Outer", probe_class("Inner", &log));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&class, Props::new().with("text", "1"))
        .unwrap();
    assert_eq!(log.received.get(), 0);

    engine
        .set_props(root, Props::new().with("text", "2"))
        .unwrap();
    assert_eq!(log.received.get(), 1);
}

#[test]
fn test_will_update_state_and_state_driven_rerender() {
    struct Counter;
    impl Component for Counter {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let count = rc
                .state()
                .get("count")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let span = rc.element("span");
            rc.inner_text(span, &format!("{}", count as i64))?;
            Ok(span)
        }
        fn will_update_state(&self, _current: &State, incoming: &State) {
            assert!(incoming.contains_key("count"));
        }
    }
    let class = ComponentClass::new("Counter", |_| Box::new(Counter));

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine.render(&class, Props::new()).unwrap();
    let dom = engine.dom_handle(root).unwrap();
    assert_eq!(engine.dom().to_html(dom), "<span>0</span>");

    let state = State::from([("count".to_string(), 3.into())]);
    let report = engine.set_state(root, state).unwrap();

    assert_eq!(report.dom_writes, 1);
    assert_eq!(engine.dom().to_html(dom), "<span>3</span>");
}

#[test]
fn test_dispose_fires_exactly_once() {
    let log = HookLog::default();
    let inner = probe_class("Inner", &log);

    struct Gate {
        inner: ComponentClass,
    }
    impl Component for Gate {
        fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId> {
            let open = rc.props().boolean("open").unwrap_or(false);
            let div = rc.element("div");
            if open {
                let child = rc.component(&self.inner, Props::new().with("text", "x"))?;
                rc.append(div, child)?;
            }
            Ok(div)
        }
    }
    let inner_for_gate = inner.clone();
    let gate = ComponentClass::new("Gate", move |_| {
        Box::new(Gate {
            inner: inner_for_gate.clone(),
        })
    });

    let mut engine = Engine::new(MemoryDom::new());
    let (root, _) = engine
        .render(&gate, Props::new().with("open", true))
        .unwrap();
    let child = engine.structural_ref(root, "Inner").unwrap();

    let report = engine
        .set_props(root, Props::new().with("open", false))
        .unwrap();

    assert!(report.disposed.contains(&child));
    assert_eq!(log.disposals.get(), 1);
    assert!(engine.instance(child).is_none());
    assert_eq!(engine.structural_ref(root, "Inner"), None);

    // bringing the subtree back builds a fresh instance
    engine
        .set_props(root, Props::new().with("open", true))
        .unwrap();
    let reborn = engine.structural_ref(root, "Inner").unwrap();
    assert_ne!(reborn, child);
    assert_eq!(log.disposals.get(), 1);
}
