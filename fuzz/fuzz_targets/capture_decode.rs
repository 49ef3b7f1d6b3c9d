#![no_main]

use libfuzzer_sys::fuzz_target;
use us144_stream::fuzzing::fuzz_decode_capture;

fuzz_target!(|data: &[u8]| {
    fuzz_decode_capture(data);
});
