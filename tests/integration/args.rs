// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use tempfile::tempdir;

use crate::*;

#[test]
fn test_no_args_prints_help() {
    let cmd = rawspec().ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("USAGE"), "{stderr}");
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    write_raw(&dir.path().join("obs.0000.raw"), &[0]);
    let out = dir.path().join("out");

    let cmd = rawspec()
        .args([
            dir.path().join("obs").to_str().unwrap(),
            "-f",
            "16",
            "-t",
            "4",
            "-d",
            out.to_str().unwrap(),
            "--dry-run",
        ])
        .ok();
    let succeeded = cmd.is_ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(succeeded, "{stdout}\n{stderr}");
    assert!(stdout.contains("Dry run"), "{stdout}");
    assert!(!out.exists());
}

#[test]
fn test_bad_products_are_rejected() {
    let cmd = rawspec()
        .args(["obs", "-f", "16,32", "-t", "4", "--dry-run"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error: "), "{stderr}");
    assert!(stderr.contains("integration lengths"), "{stderr}");
}

#[test]
fn test_save_toml_round_trips() {
    let dir = tempdir().unwrap();
    write_raw(&dir.path().join("obs.0000.raw"), &[0]);
    let out = dir.path().join("out");
    let toml = dir.path().join("args.toml");

    let cmd = rawspec()
        .args([
            dir.path().join("obs").to_str().unwrap(),
            "-f",
            "16",
            "-t",
            "4",
            "-d",
            out.to_str().unwrap(),
            "--save-toml",
            toml.to_str().unwrap(),
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    assert!(toml.exists());

    // Running from the saved arguments produces the spectra.
    let cmd = rawspec()
        .args(["--args-file", toml.to_str().unwrap(), "--no-progress-bars"])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (header, _) = read_fil(&out.join("obs.rawspec.0000.fil"));
    assert_eq!(header.nchans, 64);
}

#[test]
fn test_missing_stem_is_skipped() {
    let dir = tempdir().unwrap();
    let cmd = rawspec()
        .args([
            dir.path().join("nothing").to_str().unwrap(),
            "-d",
            dir.path().to_str().unwrap(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
}
