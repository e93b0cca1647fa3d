#![no_main]

use arbitrary::Arbitrary;
use arbor_core::identity::{HasIdentity, IdentityToken};
use arbor_core::navigation::{NavigationId, Presentable, StableId};
use arbor_runtime::{Container, ObservableState};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, PartialEq)]
struct Screen {
    id: IdentityToken,
    visits: u8,
}

impl HasIdentity for Screen {
    fn identity(&self) -> IdentityToken {
        self.id
    }
}

impl ObservableState for Screen {}

impl Presentable for Screen {
    fn stable_id(&self) -> Option<StableId> {
        Some(self.id.into())
    }
}

#[derive(Arbitrary, Debug)]
enum Op {
    Push,
    Pop,
    Visit(u8),
    Rescope,
    Release(u8),
}

fuzz_target!(|ops: Vec<Op>| {
    let (store, writer) = Container::<Vec<Screen>, ()>::root(Vec::new(), |_| {});
    let base = NavigationId::root();
    let mut held = Vec::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Push => {
                writer.update(|s| s.push(Screen { id: IdentityToken::new(), visits: 0 }));
            }
            Op::Pop => {
                writer.update(|s| {
                    s.pop();
                });
            }
            Op::Visit(i) => {
                writer.update(|s| {
                    let len = s.len();
                    if len > 0 {
                        s[usize::from(i) % len].visits = s[usize::from(i) % len].visits.wrapping_add(1);
                    }
                });
            }
            Op::Rescope => {
                let (children, _diff) =
                    store.scope_stack(&base, |s: &Vec<Screen>| s.clone(), |_: NavigationId, _: ()| ());
                let current = writer.current();
                assert_eq!(children.len(), current.len());
                assert_eq!(store.child_count(), current.len());
                for ((_, child), screen) in children.iter().zip(&current) {
                    assert_eq!(child.peek(), *screen);
                }
                held.extend(children.into_iter().map(|(_, child)| child));
            }
            Op::Release(i) => {
                if !held.is_empty() {
                    let child = held.remove(usize::from(i) % held.len());
                    // Handles outlive removal from the stack and keep answering.
                    let _ = child.peek();
                }
            }
        }
    }
});
