use super::framework::run_suite;

use std::fs;
use std::path::Path;

#[test]
fn sdam_rs() {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/sdam/rs/");
    let paths = fs::read_dir(&Path::new(dir)).unwrap();

    let mut ran = 0;
    for path in paths {
        let path = path.unwrap().path();
        let filename = path.to_string_lossy();
        if filename.ends_with(".json") {
            run_suite(&filename);
            ran += 1;
        }
    }

    assert!(ran > 0, "no suites found in {}", dir);
}
