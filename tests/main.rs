use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::*;
use std::process::Command;
use tempfile::tempdir;

fn box_obj() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/box.obj")
}

fn capture(out: &Path, mode: &str) -> Command {
    let mut cmd = Command::cargo_bin("sfmgen").unwrap();
    cmd.arg("capture")
        .arg(box_obj())
        .arg(out)
        .arg("--mode")
        .arg(mode)
        .arg("--width")
        .arg("64")
        .arg("--height")
        .arg("48")
        .arg("--focal")
        .arg("50")
        .arg("--quiet");
    cmd
}

#[test]
fn capture_photo_orbit() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let out = dir.path().join("photos");

    let mut cmd = capture(&out, "photo");
    cmd.arg("--orbit")
        .arg("4")
        .arg("--radius")
        .arg("5")
        .arg("--k1")
        .arg("-0.05");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Captured 4 views"));

    for i in 1..=4 {
        assert!(out.join(format!("{:06}.png", i)).exists());
    }
    assert!(out.join("dataset.sfm").exists());

    Ok(())
}

#[test]
fn capture_silhouette_orbit() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let out = dir.path().join("masks");

    let mut cmd = capture(&out, "silhouette");
    cmd.arg("--orbit").arg("2").arg("--radius").arg("5");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Captured 2 views with 0 observations"));
    assert!(out.join("000002.png").exists());

    Ok(())
}

#[test]
fn capture_depth_binary_dataset() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let out = dir.path().join("depth");
    let dataset = dir.path().join("depth.bsfm");

    let mut cmd = capture(&out, "depth");
    cmd.arg("--orbit")
        .arg("2")
        .arg("--radius")
        .arg("5")
        .arg("--dataset")
        .arg(&dataset);
    cmd.assert().success();
    assert!(out.join("000001.exr").exists());
    assert!(out.join("000002.exr").exists());

    let mut check = Command::cargo_bin("sfmgen")?;
    check.arg("check").arg(&dataset);
    check
        .assert()
        .success()
        .stdout(predicate::str::contains("2 views"));

    Ok(())
}

#[test]
fn capture_script_then_check_and_ply() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let out = dir.path().join("scripted");
    let script = dir.path().join("views.txt");
    std::fs::write(
        &script,
        "# front and side\n\
         look_at 0.3 0.4 5  0 0 0  0 1 0\n\
         capture\n\
         distortion -0.1 0.01\n\
         look_at 4 1 3  0 0 0  0 1 0\n\
         capture\n",
    )?;

    let mut cmd = capture(&out, "photo");
    cmd.arg("--script").arg(&script);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Captured 2 views"))
        .stdout(predicate::str::contains("Wrote dataset"));

    let dataset = out.join("dataset.sfm");
    let mut check = Command::cargo_bin("sfmgen")?;
    check.arg("check").arg(&dataset);
    check
        .assert()
        .success()
        .stdout(predicate::str::contains("Total reprojection error"));

    let ply = dir.path().join("views.ply");
    let mut cmd_ply = Command::cargo_bin("sfmgen")?;
    cmd_ply.arg("ply").arg(&dataset).arg(&ply);
    cmd_ply.assert().success();
    assert!(ply.exists());

    Ok(())
}

#[test]
fn capture_bad_script_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let script = dir.path().join("views.txt");
    std::fs::write(&script, "capture\nlook_at 1 2\n")?;

    let mut cmd = capture(&dir.path().join("out"), "photo");
    cmd.arg("--script").arg(&script);
    cmd.assert().failure();

    Ok(())
}

#[test]
fn capture_requires_viewpoints() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    capture(&dir.path().join("out"), "photo").assert().failure();
    Ok(())
}
