use std::process::{Command, Output};

use netquant::{Model, Weight};

fn quantise(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_quantise")).args(args).env_remove("RUST_LOG").output().unwrap()
}

#[test]
fn missing_arguments_print_usage_and_exit_1() {
    for args in [&[][..], &["in.safetensors"], &["in.safetensors", "out.safetensors"]] {
        let output = quantise(args);
        let stdout = String::from_utf8_lossy(&output.stdout);

        assert_eq!(output.status.code(), Some(1), "{args:?}");
        assert!(stdout.starts_with("USAGE: "), "{args:?}: {stdout}");
        assert!(stdout.contains("<input_model> <output_model> <mode> [<bits>]"));
    }
}

#[test]
fn successful_run_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.safetensors");
    let output = dir.path().join("out.safetensors");

    let mut model = Model::new();
    model.insert("w", Weight::Float { shape: vec![2, 2], values: vec![0.5, -0.5, 1.0, 2.0] });
    netquant::save(&model, &input).unwrap();

    let run = quantise(&[input.to_str().unwrap(), output.to_str().unwrap(), "linear", "4"]);

    assert!(run.status.success());
    assert!(run.stdout.is_empty(), "{}", String::from_utf8_lossy(&run.stdout));
    assert!(run.stderr.is_empty(), "{}", String::from_utf8_lossy(&run.stderr));
    assert!(matches!(netquant::load(&output).unwrap().get("w"), Some(Weight::Linear { bits: 4, .. })));
}

#[test]
fn redirected_logs_have_no_colour() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.safetensors");
    let output = dir.path().join("out.safetensors");

    let mut model = Model::new();
    model.insert("w", Weight::Float { shape: vec![3], values: vec![0.0, 1.0, 2.0] });
    netquant::save(&model, &input).unwrap();

    let run = Command::new(env!("CARGO_BIN_EXE_quantise"))
        .args([input.to_str().unwrap(), output.to_str().unwrap(), "kmeans", "2"])
        .env("RUST_LOG", "info")
        .output()
        .unwrap();

    assert!(run.status.success());
    assert!(!run.stderr.is_empty());
    assert!(!run.stderr.contains(&0x1b), "{}", String::from_utf8_lossy(&run.stderr));
}

#[test]
fn library_errors_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.safetensors");
    let output = dir.path().join("out.safetensors");

    let mut model = Model::new();
    model.insert("w", Weight::Float { shape: vec![2], values: vec![1.0, 2.0] });
    netquant::save(&model, &input).unwrap();

    let run = quantise(&[input.to_str().unwrap(), output.to_str().unwrap(), "bogus"]);

    assert!(!run.status.success());
    assert!(String::from_utf8_lossy(&run.stderr).contains("Unknown quantisation mode `bogus`"));
    assert!(!output.exists());
}
