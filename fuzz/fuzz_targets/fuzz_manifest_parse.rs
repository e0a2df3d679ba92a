#![no_main]

use fieldsnap::Manifest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing must never panic; anything it accepts must survive a re-render
    if let Ok(manifest) = Manifest::parse(text) {
        let reparsed = Manifest::parse(&manifest.render()).expect("rendered manifest parses");
        assert_eq!(reparsed.len(), manifest.len());
    }
});
