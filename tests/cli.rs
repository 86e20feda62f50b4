use std::io::Write;
use std::process::{Command, Output, Stdio};
use tempfile::NamedTempFile;

fn bfjit(program: &[u8], args: &[&str], input: &[u8]) -> Output {

    // Save the program to a temporary location
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(program).unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_bfjit"))
        .args(args)
        .arg(file.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_runs_program() {
    let output = bfjit(b"++++++++[>++++++++<-]>.", &[], b"");
    assert!(output.status.success());
    assert_eq!(output.stdout, vec![64]);
}

#[test]
fn test_reads_stdin() {
    let output = bfjit(b",+[-.,+]", &[], b"echo");
    assert!(output.status.success());
    assert_eq!(output.stdout, b"echo".to_vec());
}

#[test]
fn test_tape_size_option() {
    let output = bfjit(b"+>>>.", &["--tape-size", "3"], b"");
    assert!(output.status.success());
    assert_eq!(output.stdout, vec![1]);
}

#[test]
fn test_dump_does_not_run() {
    let output = bfjit(b"+.", &["--dump"], b"");
    assert!(output.status.success());
    let listing = String::from_utf8(output.stdout).unwrap();
    assert!(listing.contains("call bf_write_byte(r1)"));
}

#[test]
fn test_unbalanced_program_fails() {
    let output = bfjit(b"+[", &[], b"");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unclosed '['"));
}

#[test]
fn test_missing_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_bfjit"))
        .arg("/nonexistent/program.b")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Cannot read"));
}

#[test]
#[cfg(all(target_arch = "x86_64", not(windows)))]
fn test_native_tape_size_limit() {
    use bfjit::backend::native::MAX_BUFFER_SIZE;

    // The largest tape still fits the stack frame
    let largest = MAX_BUFFER_SIZE.to_string();
    let output = bfjit(b"+<.>.", &["--tape-size", &largest], b"");
    assert!(output.status.success());
    assert_eq!(output.stdout, vec![0, 1]);

    // One more cell is rejected before compiling anything
    let oversized = (MAX_BUFFER_SIZE + 1).to_string();
    let output = bfjit(b"+.", &["--tape-size", &oversized], b"");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains(&format!("at most {} cells", MAX_BUFFER_SIZE)));

    // Dumping does not run natively, so there is no limit
    let output = bfjit(b"+.", &["--tape-size", &oversized, "--dump"], b"");
    assert!(output.status.success());
}

#[test]
fn test_optimization_level_out_of_range() {
    let output = bfjit(b"+.", &["-O", "4"], b"");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("between 0 and 3"));

    let output = bfjit(b"+.", &["-O", "3"], b"");
    assert!(output.status.success());
    assert_eq!(output.stdout, vec![1]);
}

#[test]
#[cfg(feature = "llvm")]
fn test_dump_llvm_ir() {
    let output = bfjit(b"+.", &["--dump", "-b", "llvm"], b"");
    assert!(output.status.success());
    let ir = String::from_utf8(output.stdout).unwrap();
    assert!(ir.contains("@bf_main"));
    assert!(ir.contains("@bf_write_byte"));
}

#[test]
#[cfg(not(feature = "llvm"))]
fn test_dump_llvm_ir_needs_feature() {
    let output = bfjit(b"+.", &["--dump", "-b", "llvm"], b"");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--features llvm"));
}
