#![no_main]
use bascula_core::wire::{StreamUpdate, parse_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(StreamUpdate::Update(u)) = parse_frame(data) {
        // Accepted weights are always usable numbers.
        if let Some(w) = u.weight {
            assert!(w.is_finite(), "non-finite weight from {data:?}");
        }
    }
});
