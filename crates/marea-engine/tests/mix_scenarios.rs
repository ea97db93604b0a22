//! End-to-end mixing scenarios, driven through the engine's offline path
//!
//! Each test builds a real engine, configures it through the parameter
//! queue only, and pulls blocks the same way the device callback would.

use marea_bridge::{DynamicsField, EqField, ParameterUpdate, SignalKind};
use marea_core::{db_to_linear, linear_to_db};
use marea_engine::{AudioEngine, DecodedClip};

const BLOCK: usize = 256;
const FS: f32 = 44_100.0;

/// Render whole blocks, returning deinterleaved master output
fn render_blocks(engine: &AudioEngine, blocks: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = Vec::with_capacity(blocks * BLOCK);
    let mut right = Vec::with_capacity(blocks * BLOCK);
    let mut buffer = vec![0.0f32; BLOCK * 2];
    for _ in 0..blocks {
        engine.render_block(&mut buffer);
        for frame in buffer.chunks(2) {
            left.push(frame[0]);
            right.push(frame[1]);
        }
    }
    (left, right)
}

fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |acc, x| acc.max(x.abs()))
}

#[test]
fn silence_in_silence_out() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 440.0);
    engine.transport_start();
    // Feed ten blocks of decoded zeros
    render_blocks(&engine, 1); // drain AddTrack first so the source lands on it
    engine.set_track_source(0, Box::new(DecodedClip::new(vec![0.0; BLOCK * 10], 1, 44_100)));

    let (left, right) = render_blocks(&engine, 10);

    assert!(left.iter().all(|x| x.abs() < 1e-7));
    assert!(right.iter().all(|x| x.abs() < 1e-7));
    let (rms_l, rms_r) = engine.master_rms();
    assert!(rms_l < 1e-7 && rms_r < 1e-7);
}

#[test]
fn unity_sine() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 440.0);
    // Amplitude 0.5 via track volume; pan center; no effects engaged
    engine.send(ParameterUpdate::TrackVolume {
        track_id: 0,
        volume: 0.5,
    });
    engine.transport_start();

    // One second to settle, then measure a second
    render_blocks(&engine, (FS as usize / BLOCK) + 1);
    let (left, right) = render_blocks(&engine, FS as usize / BLOCK);

    for (l, r) in left.iter().zip(&right) {
        assert!((l - r).abs() < 1e-6, "center pan must be identical L/R");
    }

    let measured_peak = peak(&left);
    assert!(
        (measured_peak - 0.5).abs() < 1e-3,
        "amplitude {}",
        measured_peak
    );

    let measured_rms = rms(&left);
    assert!(
        (measured_rms - 0.3536).abs() < 3e-3,
        "rms {}",
        measured_rms
    );

    // 440 Hz: 880 sign changes per second
    let crossings = left
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    assert!((crossings as i32 - 880).abs() <= 4, "crossings {}", crossings);
}

#[test]
fn peak_eq_boost_gain() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 1_000.0);
    engine.send(ParameterUpdate::TrackVolume {
        track_id: 0,
        volume: 0.1,
    });
    // Band 3 defaults to a 1 kHz peak; set it to +12 dB, Q 1, and engage
    engine.send(ParameterUpdate::EqBand {
        track_id: 0,
        band: 3,
        field: EqField::GainDb,
        value: 12.0,
    });
    engine.send(ParameterUpdate::EqBand {
        track_id: 0,
        band: 3,
        field: EqField::Q,
        value: 1.0,
    });
    engine.send(ParameterUpdate::EqBand {
        track_id: 0,
        band: 3,
        field: EqField::Enabled,
        value: 1.0,
    });
    engine.send(ParameterUpdate::EqBypass {
        track_id: 0,
        bypassed: false,
    });
    engine.transport_start();

    render_blocks(&engine, FS as usize / BLOCK); // settle
    let (left, _) = render_blocks(&engine, FS as usize / BLOCK);

    let input_rms = 0.1 / std::f32::consts::SQRT_2;
    let boost_db = 20.0 * (rms(&left) / input_rms).log10();
    assert!(
        (11.0..13.0).contains(&boost_db),
        "boost was {} dB",
        boost_db
    );
}

#[test]
fn compressor_static_gain() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 1_000.0);
    // -6 dBFS source
    engine.send(ParameterUpdate::TrackVolume {
        track_id: 0,
        volume: db_to_linear(-6.0),
    });
    for (field, value) in [
        (DynamicsField::Mode, 0.0),
        (DynamicsField::ThresholdDb, -12.0),
        (DynamicsField::Ratio, 4.0),
        (DynamicsField::KneeDb, 0.0),
        (DynamicsField::AttackMs, 1.0),
        (DynamicsField::ReleaseMs, 50.0),
    ] {
        engine.send(ParameterUpdate::DynamicsParam {
            track_id: 0,
            field,
            value,
        });
    }
    engine.send(ParameterUpdate::DynamicsBypass {
        track_id: 0,
        bypassed: false,
    });
    engine.transport_start();

    render_blocks(&engine, FS as usize / BLOCK);
    let (left, _) = render_blocks(&engine, FS as usize / BLOCK);

    let level_db = linear_to_db(peak(&left));
    assert!(
        (-10.0..=-7.0).contains(&level_db),
        "steady-state level {} dB",
        level_db
    );

    // Gain reduction meter reads through the status surface
    assert!(engine.shared().track_meters[0].gain_reduction_db() > 1.0);
}

#[test]
fn lookahead_limiter_catches_spike() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 440.0);
    for (field, value) in [
        (DynamicsField::Mode, 1.0), // limiter
        (DynamicsField::ThresholdDb, -6.0),
        (DynamicsField::ReleaseMs, 50.0),
        (DynamicsField::LookaheadMs, 5.0),
        (DynamicsField::LookaheadEnabled, 1.0),
        (DynamicsField::Detection, 0.0), // peak
    ] {
        engine.send(ParameterUpdate::DynamicsParam {
            track_id: 0,
            field,
            value,
        });
    }
    engine.send(ParameterUpdate::DynamicsBypass {
        track_id: 0,
        bypassed: false,
    });
    engine.transport_start();
    render_blocks(&engine, 1); // apply queued setup

    // Constant -12 dBFS with a full-scale single-sample spike mid-block
    let base = db_to_linear(-12.0);
    let mut clip = vec![base; BLOCK * 40];
    clip[BLOCK * 20 + BLOCK / 2] = 1.0;
    engine.set_track_source(0, Box::new(DecodedClip::new(clip, 1, 44_100)));

    let (left, right) = render_blocks(&engine, 41);

    let ceiling = db_to_linear(-5.0);
    for (n, (l, r)) in left.iter().zip(&right).enumerate() {
        assert!(
            l.abs() <= ceiling && r.abs() <= ceiling,
            "sample {} exceeded -5 dB: {} dB",
            n,
            linear_to_db(l.abs().max(r.abs()))
        );
    }
}

#[test]
fn solo_precedence_over_mute() {
    let build = |solo_setup: bool| {
        let engine = AudioEngine::with_defaults();
        if solo_setup {
            engine.add_track(0, SignalKind::Sine, 440.0);
            engine.add_track(1, SignalKind::Sine, 550.0);
            engine.add_track(2, SignalKind::Sine, 660.0);
            // Mute everything, then solo track 1: solo must win
            for id in 0..3 {
                engine.send(ParameterUpdate::TrackMute {
                    track_id: id,
                    mute: true,
                });
            }
            engine.send(ParameterUpdate::TrackSolo {
                track_id: 1,
                solo: true,
            });
        } else {
            // Reference: track 1 alone, unmuted
            engine.add_track(1, SignalKind::Sine, 550.0);
        }
        engine.transport_start();
        engine
    };

    let soloed = build(true);
    let reference = build(false);

    let (solo_l, solo_r) = render_blocks(&soloed, 20);
    let (ref_l, ref_r) = render_blocks(&reference, 20);

    assert!(solo_l.iter().any(|&x| x != 0.0), "solo output must not be silent");
    for n in 0..solo_l.len() {
        assert!(
            (solo_l[n] - ref_l[n]).abs() < 1e-6 && (solo_r[n] - ref_r[n]).abs() < 1e-6,
            "sample {} differs from isolated track",
            n
        );
    }
}

#[test]
fn mute_zeroes_contribution() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 440.0);
    engine.send(ParameterUpdate::TrackMute {
        track_id: 0,
        mute: true,
    });
    engine.transport_start();

    let (left, right) = render_blocks(&engine, 10);
    assert!(left.iter().all(|&x| x == 0.0));
    assert!(right.iter().all(|&x| x == 0.0));
}

#[test]
fn parameter_atomicity_under_load() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 440.0);
    engine.transport_start();
    render_blocks(&engine, 1);

    // The audio domain runs on its own thread, pulling blocks through the
    // graph exactly as the device callback would, while this (control)
    // thread floods the queue with volume updates.
    let audio_side = {
        let graph = engine.graph_handle();
        std::thread::spawn(move || {
            let mut buffer = vec![0.0f32; BLOCK * 2];
            let mut left: Vec<f32> = Vec::with_capacity(1000 * BLOCK);
            for _ in 0..1000 {
                graph.lock().process_block(&mut buffer);
                left.extend(buffer.iter().step_by(2));
            }
            left
        })
    };

    let max_volume = 1.0_f32;
    for volume in (1..=1000).map(|i| i as f32 / 1000.0) {
        while !engine.send(ParameterUpdate::TrackVolume {
            track_id: 0,
            volume,
        }) {
            std::thread::yield_now();
        }
    }

    let left = audio_side.join().unwrap();
    // Drain anything still queued
    render_blocks(&engine, 20);

    // Every sample stays inside the envelope allowed by the enqueued
    // volumes (the initial volume 1.0 equals the maximum enqueued).
    for (n, &sample) in left.iter().enumerate() {
        assert!(
            sample.abs() <= max_volume + 1e-6,
            "sample {} escaped the volume envelope: {}",
            n,
            sample
        );
    }

    // Last writer wins
    let graph = engine.graph_handle();
    let mut graph = graph.lock();
    let track = graph.track_mut(0).expect("track 0 active");
    assert_eq!(track.volume(), 1.0, "final volume must be the last enqueued");
}

#[test]
fn add_remove_track_lifecycle() {
    let engine = AudioEngine::with_defaults();
    engine.transport_start();

    engine.add_track(7, SignalKind::Sine, 440.0);
    render_blocks(&engine, 1);
    {
        let graph = engine.graph_handle();
        let graph = graph.lock();
        assert_eq!(graph.active_track_count(), 1);
    }

    let (left, _) = render_blocks(&engine, 4);
    assert!(left.iter().any(|&x| x != 0.0));

    engine.remove_track(7);
    render_blocks(&engine, 1);
    let (left, _) = render_blocks(&engine, 4);
    assert!(left.iter().all(|&x| x == 0.0));
    {
        let graph = engine.graph_handle();
        let graph = graph.lock();
        assert_eq!(graph.active_track_count(), 0);
    }
}

#[test]
fn master_volume_scales_output() {
    let engine = AudioEngine::with_defaults();
    engine.add_track(0, SignalKind::Sine, 440.0);
    engine.transport_start();
    render_blocks(&engine, 4);
    let (reference, _) = render_blocks(&engine, 4);

    engine.send(ParameterUpdate::MasterVolume { volume: 0.5 });
    render_blocks(&engine, 1);
    let (halved, _) = render_blocks(&engine, 4);

    let ratio = peak(&halved) / peak(&reference);
    assert!((ratio - 0.5).abs() < 0.01, "ratio {}", ratio);
}

#[test]
fn block_sizes_stay_stable() {
    use marea_core::{BufferSize, SampleRate};
    use marea_engine::EngineConfig;

    for buffer_size in [BufferSize::Samples64, BufferSize::Samples2048] {
        let engine = AudioEngine::new(EngineConfig {
            sample_rate: SampleRate::Hz44100,
            buffer_size,
            ..Default::default()
        });
        engine.add_track(0, SignalKind::Sine, 440.0);
        engine.transport_start();

        let frames = buffer_size.as_usize();
        let mut buffer = vec![0.0f32; frames * 2];
        for _ in 0..200 {
            engine.render_block(&mut buffer);
            assert!(
                buffer.iter().all(|x| x.is_finite() && x.abs() <= 1.5),
                "state drift at block size {}",
                frames
            );
        }
    }
}
