#![no_main]

use libfuzzer_sys::fuzz_target;
use us144_stream::fuzzing::fuzz_feedback;

fuzz_target!(|data: &[u8]| {
    fuzz_feedback(data);
});
