use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use dagwalk_core::buffer::CausalBuffer;
use dagwalk_core::cache::EpochWindow;
use dagwalk_core::config::BufferConfig;
use dagwalk_core::event::Event;
use dagwalk_core::shutdown::Shutdown;
use dagwalk_core::store::{EventLookup, MemoryStore};
use dagwalk_core::synth::{self, SynthConfig};
use proptest::prelude::*;

fn arb_synth() -> impl Strategy<Value = SynthConfig> {
    (1u64..6, 1u32..5, 1usize..6, 2u64..5, 1usize..4, any::<u64>()).prop_map(
        |(blocks, creators, events_per_block, blocks_per_epoch, max_parents, seed)| SynthConfig {
            blocks,
            creators,
            events_per_block,
            blocks_per_epoch,
            max_parents,
            seed,
        },
    )
}

fn release_all(events: Vec<Event>) -> Vec<Event> {
    let (sink, released) = unbounded();
    let lookup: Arc<dyn EventLookup> = Arc::new(MemoryStore::new());
    // At most three epochs are generated and all stay inside the released
    // set's window, so late parents in a shuffled run are still recognised.
    let cache = Arc::new(EpochWindow::new(3, 1));
    let mut buffer = CausalBuffer::new(
        BufferConfig::default(),
        cache,
        lookup,
        sink,
        Shutdown::new(),
    );
    for event in events {
        buffer.push(event).expect("push");
    }
    assert!(buffer.is_empty(), "every event should have been released");
    drop(buffer);
    released.iter().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn shuffled_arrival_is_released_parents_first(config in arb_synth(), order in any::<u64>()) {
        let dag = synth::generate(&config).expect("generate");
        let released = release_all(synth::shuffled(dag.events(), order));

        prop_assert_eq!(released.len(), dag.events().len());
        let mut seen = HashSet::new();
        for event in &released {
            for parent in event.parents() {
                prop_assert!(seen.contains(parent), "{} released before parent {}", event.id(), parent);
            }
            prop_assert!(seen.insert(event.id()), "{} released twice", event.id());
        }
    }

    #[test]
    fn duplicate_arrivals_are_released_once(config in arb_synth(), order in any::<u64>()) {
        let dag = synth::generate(&config).expect("generate");
        let mut doubled = dag.events().to_vec();
        doubled.extend(dag.events().iter().cloned());
        let released = release_all(synth::shuffled(&doubled, order));

        let unique: HashSet<_> = released.iter().map(Event::id).collect();
        prop_assert_eq!(unique.len(), released.len());
        prop_assert_eq!(released.len(), dag.events().len());
    }
}
