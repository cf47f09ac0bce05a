//! Integration tests for the separation fallback chain.
//!
//! Each test drives `Separator` against real files on disk:
//! - A missing external program drops through to the mid-side split
//! - Undecodable input drops all the way to pass-through copies
//! - Mid-side output matches the pre-emphasised mid and the side signal

use std::fs;
use std::path::PathBuf;

use voice_cover::audio::Audio;
use voice_cover::audio::file;
use voice_cover::config::SeparatorConfig;
use voice_cover::separator::mid_side::mid_side_split;
use voice_cover::separator::{Passthrough, SeparationJob, SeparationStrategy, Separator};

fn output_dir(name: &str) -> PathBuf {
    let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("tests");
    p.push("out");
    p.push("separator_fallback");
    p.push(name);
    let _ = fs::remove_dir_all(&p);
    fs::create_dir_all(&p).expect("failed to create tests/out directory");
    p
}

fn stereo_mix(seconds: f32) -> Audio {
    let sample_rate = 44_100;
    let n = (sample_rate as f32 * seconds) as usize;
    let tone = |freq: f32, amp: f32| -> Vec<f32> {
        (0..n)
            .map(|i| {
                amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    };
    Audio::stereo(sample_rate, tone(440.0, 0.5), tone(660.0, 0.3))
}

fn offline_config() -> SeparatorConfig {
    SeparatorConfig {
        program: None,
        enhance_vocals: false,
        ..SeparatorConfig::default()
    }
}

#[test]
fn missing_program_falls_back_to_mid_side() -> anyhow::Result<()> {
    let dir = output_dir("missing_program");
    let input = dir.join("song.wav");
    file::save_audio_to_path(&stereo_mix(1.0), &input)?;

    let config = SeparatorConfig {
        program: Some("voice-cover-definitely-not-installed".to_string()),
        ..SeparatorConfig::default()
    };
    let separator = Separator::from_config(&config);
    let stems = separator.separate(&input, &dir.join("vocal.wav"), &dir.join("inst.wav"))?;

    assert_eq!(stems.strategy, "mid-side");
    assert!(fs::metadata(&stems.vocal)?.len() > 0);
    assert!(fs::metadata(&stems.instrumental)?.len() > 0);
    assert!(file::verify_audio_file(&stems.vocal));
    assert!(file::verify_audio_file(&stems.instrumental));
    Ok(())
}

#[test]
fn undecodable_input_is_passed_through() -> anyhow::Result<()> {
    let dir = output_dir("undecodable");
    let input = dir.join("song.wav");
    let bytes = b"RIFF but not really a wave file".repeat(64);
    fs::write(&input, &bytes)?;

    let separator = Separator::from_config(&offline_config());
    let stems = separator.separate(&input, &dir.join("vocal.wav"), &dir.join("inst.wav"))?;

    assert_eq!(stems.strategy, "passthrough");
    assert_eq!(fs::read(&stems.vocal)?, bytes);
    assert_eq!(fs::read(&stems.instrumental)?, bytes);
    Ok(())
}

#[test]
fn passthrough_copies_are_byte_identical() -> anyhow::Result<()> {
    let dir = output_dir("passthrough");
    let input = dir.join("song.wav");
    file::save_audio_to_path(&stereo_mix(0.5), &input)?;

    let job = SeparationJob::new(&input, &dir.join("vocal.wav"), &dir.join("inst.wav"));
    Passthrough.separate(&job)?;
    let original = fs::read(&input)?;
    assert_eq!(fs::read(&job.vocal_output)?, original);
    assert_eq!(fs::read(&job.instrumental_output)?, original);
    Ok(())
}

#[test]
fn mid_side_stems_match_channel_arithmetic() -> anyhow::Result<()> {
    let dir = output_dir("mid_side");
    let input = dir.join("song.wav");
    file::save_audio_to_path(&stereo_mix(2.0), &input)?;
    // Compare against what was actually written, after 16-bit quantisation.
    let written = file::load_audio_from_path(&input)?;
    let (expected_vocal, expected_side) = mid_side_split(written.left(), written.right());

    let separator = Separator::from_config(&offline_config());
    let stems = separator.separate(&input, &dir.join("vocal.wav"), &dir.join("inst.wav"))?;
    assert_eq!(stems.strategy, "mid-side");

    let vocal = file::load_audio_from_path(&stems.vocal)?;
    let side = file::load_audio_from_path(&stems.instrumental)?;
    assert_eq!(vocal.sample_rate(), 44_100);
    assert_eq!(vocal.length(), expected_vocal.len());
    assert_eq!(side.length(), expected_side.len());
    for (a, b) in vocal.channel(0).iter().zip(&expected_vocal) {
        assert!((a - b).abs() < 2e-4, "vocal sample {a} vs {b}");
    }
    for (a, b) in side.channel(0).iter().zip(&expected_side) {
        assert!((a - b).abs() < 2e-4, "side sample {a} vs {b}");
    }
    Ok(())
}

#[test]
fn mono_input_has_silent_side() -> anyhow::Result<()> {
    let dir = output_dir("mono");
    let input = dir.join("song.wav");
    let mono = Audio::mono(44_100, stereo_mix(1.0).left().to_vec());
    file::save_audio_to_path(&mono, &input)?;

    let separator = Separator::from_config(&offline_config());
    let stems = separator.separate(&input, &dir.join("vocal.wav"), &dir.join("inst.wav"))?;
    assert_eq!(stems.strategy, "mid-side");
    let side = file::load_audio_from_path(&stems.instrumental)?;
    assert!(side.peak() < 1e-4);
    Ok(())
}
