//! Integration tests for low-level audio file I/O.
//!
//! These tests exercise the public audio I/O API using synthetic files:
//! - Round-tripping audio through save + load
//! - Handling invalid / missing files
//! - Verification thresholds and atomic copies

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use voice_cover::VoiceError;
use voice_cover::audio::Audio;
use voice_cover::audio::file;

fn output_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("tests");
    p.push("out");
    p.push("audio_file_io");
    fs::create_dir_all(&p).expect("failed to create tests/out directory");
    p.push(name);
    p
}

fn sine(freq: f32, sample_rate: u32, seconds: f32, amp: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

#[test]
fn round_trip_save_and_load_stereo_wav() -> anyhow::Result<()> {
    let sample_rate = 44_100;
    let left = sine(440.0, sample_rate, 0.5, 0.5);
    let right = sine(660.0, sample_rate, 0.5, 0.25);
    let audio = Audio::stereo(sample_rate, left.clone(), right.clone());

    let out_path = output_path("round_trip.wav");
    file::save_audio_to_path(&audio, &out_path)?;
    assert!(out_path.exists(), "expected output file at {:?}", out_path);

    let reloaded = file::load_audio_from_path(&out_path)?;
    assert_eq!(reloaded.sample_rate(), sample_rate);
    assert_eq!(reloaded.n_channels(), 2);
    assert_eq!(reloaded.left().len(), left.len());
    for (a, b) in reloaded.left().iter().zip(&left) {
        assert!((a - b).abs() < 1e-4, "left sample drifted: {a} vs {b}");
    }
    for (a, b) in reloaded.right().iter().zip(&right) {
        assert!((a - b).abs() < 1e-4, "right sample drifted: {a} vs {b}");
    }
    Ok(())
}

#[test]
fn saving_clips_out_of_range_samples() -> anyhow::Result<()> {
    let audio = Audio::mono(8_000, vec![2.0, -3.0, 0.5].repeat(1_000));
    let out_path = output_path("clipped.wav");
    file::save_audio_to_path(&audio, &out_path)?;

    let reloaded = file::load_audio_from_path(&out_path)?;
    assert!(reloaded.peak() <= 1.0);
    assert!(reloaded.channel(0)[0] > 0.99);
    assert!(reloaded.channel(0)[1] < -0.99);
    Ok(())
}

#[test]
fn mono_resampled_load_changes_rate_and_length() -> anyhow::Result<()> {
    let audio = Audio::stereo(22_050, sine(220.0, 22_050, 1.0, 0.5), sine(220.0, 22_050, 1.0, 0.5));
    let out_path = output_path("half_rate.wav");
    file::save_audio_to_path(&audio, &out_path)?;

    let loaded = file::load_mono_resampled(&out_path, 44_100)?;
    assert_eq!(loaded.sample_rate(), 44_100);
    assert_eq!(loaded.n_channels(), 1);
    assert!((loaded.length() as i64 - 44_100).abs() <= 2);
    Ok(())
}

#[test]
fn loading_nonexistent_file_is_missing_input() {
    let bogus = output_path("this_file_should_not_exist_12345.wav");
    let _ = fs::remove_file(&bogus);

    let err = file::load_audio_from_path(&bogus).unwrap_err();
    assert!(
        matches!(err.downcast_ref::<VoiceError>(), Some(VoiceError::MissingInput(_))),
        "unexpected error: {err:?}"
    );
}

#[test]
fn loading_invalid_file_returns_error() -> anyhow::Result<()> {
    let path = output_path("not_audio.wav");
    {
        let mut f = fs::File::create(&path)?;
        writeln!(f, "this is not an audio file")?;
    }

    let result = file::load_audio_from_path(&path);
    assert!(result.is_err(), "expected error, got: {:?}", result.map(|a| a.length()));
    assert!(!file::verify_audio_file(&path));
    Ok(())
}

#[test]
fn verification_needs_enough_duration() -> anyhow::Result<()> {
    let long = output_path("long_enough.wav");
    file::save_audio_to_path(&Audio::mono(44_100, sine(440.0, 44_100, 0.5, 0.5)), &long)?;
    assert!(file::verify_audio_file(&long));

    // Big enough on disk but only 50 ms of audio.
    let short = output_path("too_short.wav");
    file::save_audio_to_path(&Audio::mono(44_100, sine(440.0, 44_100, 0.05, 0.5)), &short)?;
    assert!(fs::metadata(&short)?.len() >= 1024);
    assert!(!file::verify_audio_file(&short));
    Ok(())
}

#[test]
fn atomic_copy_is_byte_identical() -> anyhow::Result<()> {
    let from = output_path("copy_source.wav");
    file::save_audio_to_path(&Audio::mono(16_000, sine(300.0, 16_000, 0.25, 0.3)), &from)?;
    let to = output_path("nested/copy_target.wav");
    file::copy_atomically(&from, &to)?;
    assert_eq!(fs::read(&from)?, fs::read(&to)?);
    Ok(())
}
