//! Integration tests for the retro-run CLI.

use retro_core as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror as _;
use tracing as _;
use tracing_subscriber as _;

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("retro-run")
}

/// One bank: `LDA #$01; STA $10; INC $11; JMP $E004`, reset vector `$E000`.
fn write_image(dir: &Path) -> PathBuf {
    let mut image = vec![0xEA; 0x2000];
    image[..9].copy_from_slice(&[0xA9, 0x01, 0x85, 0x10, 0xE6, 0x11, 0x4C, 0x04, 0xE0]);
    image[0x1FFC] = 0x00;
    image[0x1FFD] = 0xE0;
    let path = dir.join("loop.bin");
    fs::write(&path, image).unwrap();
    path
}

#[test]
fn run_saves_a_loadable_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = write_image(temp_dir.path());
    let state = temp_dir.path().join("slot0.rcss");

    let output = Command::new(binary_path())
        .args(["run", image.to_str().unwrap(), "--frames", "3", "--save"])
        .arg(&state)
        .output()
        .expect("failed to run retro-run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Ran 3 frames"), "{stdout}");
    let saved = fs::read(&state).unwrap();
    assert_eq!(&saved[..4], b"RCSS");

    let status = Command::new(binary_path())
        .args(["run", image.to_str().unwrap(), "-f", "1", "--load"])
        .arg(&state)
        .status()
        .expect("failed to run retro-run");
    assert!(status.success());
}

#[test]
fn breakpoint_stops_the_run_early() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = write_image(temp_dir.path());

    let output = Command::new(binary_path())
        .args(["run", image.to_str().unwrap(), "--break", "E004"])
        .output()
        .expect("failed to run retro-run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Ran 0 frames"), "{stdout}");
    assert!(stdout.contains("Breakpoint"), "{stdout}");
}

#[test]
fn disasm_lists_from_the_reset_vector() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = write_image(temp_dir.path());

    let output = Command::new(binary_path())
        .args(["disasm", image.to_str().unwrap(), "-n", "4"])
        .output()
        .expect("failed to run retro-run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("E000: A9 01"), "{stdout}");
    assert!(lines[3].contains("JMP"), "{stdout}");
}

#[test]
fn missing_image_fails_with_message() {
    let temp_dir = tempfile::tempdir().unwrap();

    let output = Command::new(binary_path())
        .args(["run"])
        .arg(temp_dir.path().join("absent.bin"))
        .output()
        .expect("failed to run retro-run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "{stderr}");
}

#[test]
fn unknown_command_prints_usage() {
    let output = Command::new(binary_path())
        .args(["flash"])
        .output()
        .expect("failed to run retro-run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown command"));
    assert!(stderr.contains("Usage: retro-run"));
}
