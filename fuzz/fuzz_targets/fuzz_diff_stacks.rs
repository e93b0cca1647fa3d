#![no_main]

use arbor_core::navigation::{NavigationId, Presentable, StableId, diff_stacks};
use libfuzzer_sys::fuzz_target;

struct Entry(u8);

impl Presentable for Entry {
    fn stable_id(&self) -> Option<StableId> {
        Some(StableId::Index(u64::from(self.0 & 0x0f)))
    }
}

fn ids(base: &NavigationId, raw: &[u8]) -> Vec<NavigationId> {
    raw.iter().take(64).map(|&b| base.append(&Entry(b))).collect()
}

fuzz_target!(|input: (Vec<u8>, Vec<u8>)| {
    let base = NavigationId::root();
    let old = ids(&base, &input.0);
    let new = ids(&base, &input.1);
    let diff = diff_stacks(&old, &new);

    assert_eq!(diff.retained.len() + diff.inserted.len(), new.len());
    assert!(diff.removed.iter().all(|id| old.contains(id) && !new.contains(id)));
    assert!(diff.inserted.iter().all(|id| !old.contains(id)));
    assert!(diff.retained.iter().all(|id| old.contains(id)));
    assert!(new.iter().all(|id| id.descends_from(&base) && id.depth() == 1));
    assert!(diff_stacks(&new, &new).is_unchanged());
});
