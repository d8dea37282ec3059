#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any input may fail to decode, none may panic.
    let mut pos = 0;
    while pos < data.len() {
        match milli_h2::h2::frame::decode_frame(&data[pos..]) {
            Ok((frame, consumed)) => {
                let _ = frame.flow_len();
                if consumed == 0 {
                    break;
                }
                pos += consumed;
            }
            Err(_) => break,
        }
    }
});
