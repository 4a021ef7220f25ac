//! Verify command implementation.

use modelstore_core::engine::{verify_log, LogReport};
use std::path::Path;

/// Runs the verify command.
///
/// A torn final frame is reported but does not fail verification: opening
/// the store discards it. Damage anywhere before the tail does.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", path.display());
    println!();

    if !path.is_file() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    let report = match verify_log(&std::fs::read(path)?) {
        Ok(report) => report,
        Err(err) => {
            println!("✗ Verification failed: {err}");
            return Err("Verification failed".into());
        }
    };
    print_report(&report);

    println!();
    if report.header.is_some() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Log has no header frame");
        Err("Verification failed".into())
    }
}

fn print_report(report: &LogReport) {
    if let Some(header) = &report.header {
        println!("Format version: {}", header.format_version);
        println!("Schema version: {}", header.schema_version);
        println!("Encrypted:      {}", header.encrypted);
    }
    println!("Commit frames:  {}", report.commit_frames);
    println!(
        "Intact bytes:   {} of {}",
        report.valid_len, report.total_len
    );
    if let Some(tail) = &report.torn_tail {
        println!(
            "Torn tail at offset {} ({}); it will be discarded on open",
            tail.offset, tail.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn garbage_fails_verification() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.mslog");
        std::fs::write(&path, vec![0xAB; 64]).unwrap();
        assert!(run(&path).is_err());
    }

    #[test]
    fn missing_file_fails_verification() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("absent.mslog")).is_err());
    }
}
