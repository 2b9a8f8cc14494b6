#![no_main]

use libfuzzer_sys::fuzz_target;
use pakvault::{
    Container, ContainerState, NoProgress, OpenOptions, OpenPolicy, TracingReporter,
};
use std::io::Write;
use tempfile::NamedTempFile;

fuzz_target!(|data: &[u8]| {
    let mut temp_file = match NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return,
    };
    if temp_file.write_all(data).is_err() || temp_file.flush().is_err() {
        return;
    }

    // Both policies must end in a terminal state without panicking
    for policy in [OpenPolicy::Normal, OpenPolicy::Repair] {
        let mut container = Container::load(
            temp_file.path(),
            OpenOptions::new().policy(policy),
            &NoProgress,
            &TracingReporter,
        );
        if container.state() == ContainerState::Normal {
            let paths: Vec<String> = container.entries().map(|e| e.path.clone()).collect();
            for path in &paths {
                let _ = container.read(path);
                let _ = container.read_compressed(path);
            }
            let _ = container.contains("../../../etc/passwd");
        }
        container.dispose();
    }
});
