//! End-to-end playback scenarios: engine, player, buffer queue, output mix.

use resona::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn engine() -> Arc<Engine> {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = Engine::create(EngineOptions::default()).unwrap();
    engine.realize(false).unwrap();
    engine
}

fn stereo_player(
    engine: &Arc<Engine>,
    mix: &Arc<OutputMix>,
    num_buffers: usize,
) -> Arc<AudioPlayer> {
    let player = engine
        .create_audio_player(
            DataSource::BufferQueue {
                num_buffers,
                format: PcmFormat::stereo(48000),
            },
            DataSink::OutputMix(mix.clone()),
            &[Capability::MuteSolo],
        )
        .unwrap();
    player.realize(false).unwrap();
    player
}

fn frames(samples: &[i16]) -> Arc<[i16]> {
    Arc::from(samples)
}

#[test]
fn test_single_frame_then_underflow() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();

    // one stereo frame
    queue.enqueue(frames(&[1000, -2000])).unwrap();
    play.set_play_state(PlayState::Playing);

    let mut output = [i16::MAX; 2];
    mix_out.fill(&mut output);
    assert_eq!(output, [1000, -2000]);
    assert_eq!(queue.state().count, 0);
    assert_eq!(play.position(), 1);

    // no further data and no callback: silence
    let mut output = [i16::MAX; 2];
    mix_out.fill(&mut output);
    assert_eq!(output, [0, 0]);
    assert_eq!(queue.state().count, 0);

    engine.destroy();
}

#[test]
fn test_silence_with_no_tracks_and_frame_rounding() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();

    let mut output = [i16::MAX; 5];
    mix_out.fill(&mut output);
    // four samples of silence; the odd trailing sample is not part of a
    // whole frame and is left alone
    assert_eq!(output, [0, 0, 0, 0, i16::MAX]);
    engine.destroy();
}

#[test]
fn test_non_playing_track_is_silent() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    queue.enqueue(frames(&[5, 5])).unwrap();
    // transport left stopped

    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();
    let mut output = [i16::MAX; 2];
    mix_out.fill(&mut output);
    assert_eq!(output, [0, 0]);
    // nothing was consumed
    assert_eq!(queue.state().count, 1);
    engine.destroy();
}

#[test]
fn test_partial_underflow_zero_fills_remainder() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    queue.enqueue(frames(&[7, 8])).unwrap();
    play.set_play_state(PlayState::Playing);

    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();
    let mut output = [i16::MAX; 6];
    mix_out.fill(&mut output);
    // one frame of data, the rest cleared rather than left stale
    assert_eq!(output, [7, 8, 0, 0, 0, 0]);
    engine.destroy();
}

#[test]
fn test_desperate_callback_refills_on_underflow() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    let refills = Arc::new(AtomicUsize::new(0));
    {
        let refills = refills.clone();
        queue
            .register_callback(Some(Arc::new(move |q: &BufferQueueInterface| {
                refills.fetch_add(1, Ordering::SeqCst);
                let _ = q.enqueue(Arc::from([42i16, 43].as_slice()));
            })))
            .unwrap();
    }
    play.set_play_state(PlayState::Playing);

    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();
    let mut output = [0i16; 2];
    mix_out.fill(&mut output);
    // the queue was empty; the last-chance callback supplied the data
    assert_eq!(output, [42, 43]);
    assert!(refills.load(Ordering::SeqCst) >= 1);
    engine.destroy();
}

#[test]
fn test_two_tracks_are_summed() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let first = stereo_player(&engine, &mix, 2);
    let second = stereo_player(&engine, &mix, 2);

    for (player, samples) in [(&first, [100i16, 200]), (&second, [10i16, 20])] {
        let queue = player.get_interface::<BufferQueueInterface>().unwrap();
        queue.enqueue(frames(&samples)).unwrap();
        let play = player.get_interface::<PlayInterface>().unwrap();
        play.set_play_state(PlayState::Playing);
    }

    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();
    let mut output = [0i16; 2];
    mix_out.fill(&mut output);
    assert_eq!(output, [110, 220]);
    engine.destroy();
}

#[test]
fn test_volume_change_takes_effect_after_reconcile() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    let volume = player.get_interface::<VolumeInterface>().unwrap();
    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();

    // -20 dB is an amplitude of 0.1
    volume.set_level(-2000).unwrap();
    engine.reconcile_now();

    queue.enqueue(frames(&[10000, -10000])).unwrap();
    play.set_play_state(PlayState::Playing);
    let mut output = [0i16; 2];
    mix_out.fill(&mut output);
    // scaled copy truncates, so allow one count of slack
    assert!((output[0] - 1000).abs() <= 1, "left was {}", output[0]);
    assert!((output[1] + 1000).abs() <= 1, "right was {}", output[1]);
    engine.destroy();
}

#[test]
fn test_muted_track_is_skipped() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    let volume = player.get_interface::<VolumeInterface>().unwrap();
    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();

    volume.set_mute(true);
    engine.reconcile_now();

    queue.enqueue(frames(&[123, 456])).unwrap();
    play.set_play_state(PlayState::Playing);
    let mut output = [i16::MAX; 2];
    mix_out.fill(&mut output);
    assert_eq!(output, [0, 0]);
    // a skipped track consumes nothing
    assert_eq!(queue.state().count, 1);
    engine.destroy();
}

#[test]
fn test_queue_callback_fires_per_consumed_buffer() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 4);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    let consumed = Arc::new(AtomicUsize::new(0));
    {
        let consumed = consumed.clone();
        queue
            .register_callback(Some(Arc::new(move |_q: &BufferQueueInterface| {
                consumed.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();
    }
    queue.enqueue(frames(&[1, 1])).unwrap();
    queue.enqueue(frames(&[2, 2])).unwrap();
    play.set_play_state(PlayState::Playing);

    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();
    let mut output = [0i16; 4];
    mix_out.fill(&mut output);
    assert_eq!(output, [1, 1, 2, 2]);
    // one callback per retired buffer
    assert_eq!(queue.state().play_index, 2);
    assert_eq!(consumed.load(Ordering::SeqCst), 2);
    engine.destroy();
}

#[test]
fn test_location_conversion_driven_by_sync_thread() {
    let engine = engine();
    let listener = engine.create_listener(&[]).unwrap();
    listener.realize(false).unwrap();
    let location = listener.get_interface::<LocationInterface>().unwrap();

    location
        .set_spherical(Spherical {
            azimuth: 0.0,
            elevation: 0.0,
            distance: 2.0,
        })
        .unwrap();
    // blocks on the unknown unit until the periodic reconcile converts it
    let v = location.cartesian().unwrap();
    assert!((v - Vec3::new(0.0, 0.0, -2.0)).length() < 1e-4);
    engine.destroy();
}

#[test]
fn test_clear_discards_queued_buffers() {
    let engine = engine();
    let mix = engine.create_output_mix(&[]).unwrap();
    mix.realize(false).unwrap();
    let player = stereo_player(&engine, &mix, 2);

    let queue = player.get_interface::<BufferQueueInterface>().unwrap();
    let play = player.get_interface::<PlayInterface>().unwrap();
    queue.enqueue(frames(&[9, 9])).unwrap();
    queue.enqueue(frames(&[8, 8])).unwrap();
    queue.clear().unwrap();
    play.set_play_state(PlayState::Playing);

    let mix_out = mix.get_interface::<MixOutputInterface>().unwrap();
    let mut output = [i16::MAX; 2];
    mix_out.fill(&mut output);
    assert_eq!(output, [0, 0]);
    assert_eq!(queue.state(), QueueState { count: 0, play_index: 0 });
    engine.destroy();
}
