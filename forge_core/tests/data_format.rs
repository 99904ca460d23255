use std::fs;

use forge_core::error::Result;
use forge_core::testdata;

// data packages uploaded from Windows carry CRLF line endings in
// data_rule.txt; the parser has to take them as-is
#[test]
fn rule_file_survives_crlf() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("1.in"), "1\n")?;
    fs::write(dir.path().join("1.out"), "1\n")?;
    fs::write(
        dir.path().join("data_rule.txt"),
        "sum:100 1\r\n#.in\r\n#.out\r\n",
    )?;

    let subtasks = testdata::load(dir.path())?;
    assert_eq!(subtasks.len(), 1);
    assert_eq!(subtasks[0].weight, 100.0);
    assert_eq!(subtasks[0].cases[0].input, dir.path().join("1.in"));
    assert_eq!(subtasks[0].cases[0].output, dir.path().join("1.out"));
    Ok(())
}
