use super::*;
use crate::PetalSoundError;
use crate::audio_data::MemoryOpener;
use crate::math::Pose;
use crate::sound::PlayState;
use std::sync::atomic::{AtomicUsize, Ordering};

const RATE: u32 = 1000;
const TICK: Duration = Duration::from_millis(100);

struct Fixture {
    engine: PetalSoundEngine,
    mixer: MixerHandle,
}

impl Fixture {
    fn new(desc: PetalSoundDesc) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let opener = MemoryOpener::new();
        // 0.5 s, 3 s of looping material and 10 s, all mono at 1 kHz
        opener.insert_i16("blip", &[800i16; 500], 1, RATE);
        opener.insert_i16("loop", &[800i16; 750], 1, RATE);
        opener.insert_i16("ambience", &[800i16; 10_000], 1, RATE);

        let mixer = MixerHandle::new(SoftwareMixer::new(RATE, 2));
        let desc = desc
            .sample_rate(RATE)
            .stream_buffer_duration(Duration::from_millis(250));
        let engine = PetalSoundEngine::new(desc, Box::new(mixer.clone()), Arc::new(opener))
            .expect("engine should start");
        Self { engine, mixer }
    }

    fn voices(voices: usize) -> Self {
        Self::new(PetalSoundDesc::new().max_voices(voices))
    }

    /// Let the mixer consume `frames`, then run one engine update.
    fn step(&self, frames: usize) {
        self.mixer.advance(frames);
        self.engine.update(TICK);
    }

    fn state(&self, name: &str) -> PlayState {
        self.engine.sound_info(name).unwrap().state
    }
}

#[test]
fn preempted_sound_comes_back_when_a_voice_frees_up() {
    let fx = Fixture::voices(2);
    let e = &fx.engine;
    let a = e.create_sound("a", "ambience", SoundOptions::new().priority(1)).unwrap();
    let b = e.create_sound("b", "ambience", SoundOptions::new().priority(2)).unwrap();
    let c = e.create_sound("c", "ambience", SoundOptions::new().priority(3)).unwrap();

    e.play(a).unwrap();
    e.play(b).unwrap();
    e.play(c).unwrap();

    assert_eq!(e.active_sounds(), vec![b, c]);
    assert_eq!(e.queued_sounds(), vec![a]);
    assert!(e.poll_events().contains(&PetalSoundEvent::VoiceStolen { sound_id: a, by: c }));
    // Still playing as far as the application is concerned
    assert_eq!(fx.state("a"), PlayState::Playing);
    assert!(!e.sound_info(a).unwrap().has_voice);

    e.stop(b).unwrap();
    fx.step(0);

    assert!(e.queued_sounds().is_empty());
    assert!(e.sound_info(a).unwrap().has_voice);
    assert!(!e.sound_info(b).unwrap().has_voice);
    let events = e.poll_events();
    assert!(events.contains(&PetalSoundEvent::SoundReactivated { sound_id: a }));
    assert!(events.contains(&PetalSoundEvent::VoiceStolen { sound_id: b, by: a }));
}

#[test]
fn play_without_any_voice_waits_in_the_queue() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    e.create_sound("boss", "ambience", SoundOptions::new().priority(9)).unwrap();
    e.create_sound("step", "ambience", SoundOptions::new().priority(1)).unwrap();

    e.play("boss").unwrap();
    e.play("step").unwrap();
    assert_eq!(e.queued_sounds().len(), 1);
    assert_eq!(fx.state("step"), PlayState::Playing);

    e.stop("boss").unwrap();
    fx.step(0);
    assert!(e.sound_info("step").unwrap().has_voice);
}

#[test]
fn looping_stream_wraps_through_a_short_ring() {
    let fx = Fixture::new(PetalSoundDesc::new().max_voices(4).stream_buffer_count(4));
    let e = &fx.engine;
    let id = e
        .create_sound("music", "loop", SoundOptions::new().streaming(true).looping(true))
        .unwrap();
    let loops = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loops);
    e.set_loop_callback(id, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();

    e.play(id).unwrap();
    for _ in 0..12 {
        fx.step(250);
    }

    let events = e.poll_events();
    assert!(events.iter().any(|ev| matches!(ev, PetalSoundEvent::SoundLooped { .. })));
    assert!(!events.iter().any(|ev| matches!(ev, PetalSoundEvent::SoundFinished { .. })));
    assert!(loops.load(Ordering::Relaxed) >= 3);
    assert_eq!(fx.state("music"), PlayState::Playing);
    let position = e.play_position(id).unwrap();
    assert!((0.0..0.75).contains(&position), "position {}", position);
}

#[test]
fn streaming_sound_finishes_and_calls_back() {
    let fx = Fixture::voices(2);
    let e = &fx.engine;
    let id = e
        .create_sound("voice", "blip", SoundOptions::new().streaming(true))
        .unwrap();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    e.set_finished_callback(id, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();

    e.play(id).unwrap();
    fx.step(300);
    assert_eq!(fx.state("voice"), PlayState::Playing);
    fx.step(300);

    assert_eq!(fx.state("voice"), PlayState::Stopped);
    assert_eq!(finished.load(Ordering::Relaxed), 1);
    assert!(e.poll_events().contains(&PetalSoundEvent::SoundFinished { sound_id: id }));

    // Finishing again requires another play
    fx.step(300);
    assert_eq!(finished.load(Ordering::Relaxed), 1);
}

#[test]
fn disabled_callback_is_not_invoked() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    e.create_sound("blip", "blip", SoundOptions::new()).unwrap();
    e.set_finished_callback("blip", move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();
    e.enable_finished_callback("blip", false).unwrap();

    e.play("blip").unwrap();
    fx.step(600);
    fx.step(0);

    assert_eq!(fx.state("blip"), PlayState::Stopped);
    assert_eq!(finished.load(Ordering::Relaxed), 0);
}

#[test]
fn fades_converge_and_run_their_action() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("wind", "ambience", SoundOptions::new()).unwrap();

    e.start_fade(id, true, 1.0, FadeAction::None).unwrap();
    assert_eq!(fx.state("wind"), PlayState::Playing);
    assert_eq!(e.properties(id).unwrap().gain, 0.0);

    e.update(Duration::from_millis(500));
    let halfway = e.properties(id).unwrap().gain;
    assert!((halfway - 0.5).abs() < 1e-3, "gain {}", halfway);

    e.update(Duration::from_millis(500));
    assert_eq!(e.properties(id).unwrap().gain, 1.0);
    assert!(e.poll_events().contains(&PetalSoundEvent::FadeCompleted { sound_id: id }));

    e.start_fade(id, false, 0.5, FadeAction::Stop).unwrap();
    e.update(Duration::from_millis(250));
    e.update(Duration::from_millis(250));
    assert_eq!(e.properties(id).unwrap().gain, 0.0);
    assert_eq!(fx.state("wind"), PlayState::Stopped);
}

#[test]
fn zero_length_fade_completes_immediately() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("wind", "ambience", SoundOptions::new()).unwrap();
    e.play(id).unwrap();

    e.start_fade(id, false, 0.0, FadeAction::Pause).unwrap();
    assert_eq!(fx.state("wind"), PlayState::Paused);
    assert!(e.poll_events().contains(&PetalSoundEvent::FadeCompleted { sound_id: id }));
}

#[test]
fn static_buffers_are_shared_until_the_last_sound_goes() {
    let fx = Fixture::voices(4);
    let e = &fx.engine;
    let first = e.create_sound("one", "ambience", SoundOptions::new()).unwrap();
    let second = e.create_sound("two", "ambience", SoundOptions::new()).unwrap();
    assert!(e.is_cached("ambience"));
    assert_eq!(e.stats().cached_buffers, 1);

    e.destroy_sound(first).unwrap();
    assert!(e.is_cached("ambience"));

    e.destroy_sound(second).unwrap();
    assert!(!e.is_cached("ambience"));
    assert!(e.poll_events().contains(&PetalSoundEvent::SoundDestroyed { sound_id: second }));
}

#[test]
fn streaming_sounds_bypass_the_cache() {
    let fx = Fixture::voices(2);
    fx.engine
        .create_sound("music", "ambience", SoundOptions::new().streaming(true))
        .unwrap();
    assert!(!fx.engine.is_cached("ambience"));
}

#[test]
fn names_must_be_unique_and_known() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    e.create_sound("door", "blip", SoundOptions::new()).unwrap();

    assert!(matches!(
        e.create_sound("door", "blip", SoundOptions::new()),
        Err(PetalSoundError::DuplicateSound(_))
    ));
    assert!(matches!(e.play("window"), Err(PetalSoundError::UnknownSound(_))));
    assert!(matches!(
        e.play(SoundId(999)),
        Err(PetalSoundError::UnknownSound(_))
    ));
    assert!(e.create_sound("missing", "nowhere", SoundOptions::new()).is_err());
    assert_eq!(e.get_sound("missing"), None);
}

#[test]
fn cue_points_seek_and_reject_bad_indices() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("speech", "ambience", SoundOptions::new()).unwrap();

    assert_eq!(e.add_cue_point(id, 1.0).unwrap(), 0);
    assert_eq!(e.add_cue_point(id, 4.0).unwrap(), 1);
    assert!(matches!(
        e.set_cue_point(id, 5),
        Err(PetalSoundError::InvalidCuePoint { index: 5, count: 2 })
    ));

    e.set_cue_point(id, 1).unwrap();
    assert!((e.play_position(id).unwrap() - 4.0).abs() < 0.01);

    assert_eq!(e.remove_cue_point(id, 0).unwrap(), 1.0);
    e.clear_cue_points(id).unwrap();
    assert!(e.set_cue_point(id, 0).is_err());
}

#[test]
fn play_position_is_validated() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("speech", "ambience", SoundOptions::new()).unwrap();

    assert!(matches!(
        e.set_play_position(id, -1.0),
        Err(PetalSoundError::InvalidPosition { .. })
    ));
    assert!(e.set_play_position(id, 10.0).is_err());
    assert!(e.set_play_position(id, f32::NAN).is_err());

    e.play(id).unwrap();
    e.set_play_position(id, 2.5).unwrap();
    assert!((e.play_position(id).unwrap() - 2.5).abs() < 0.01);
}

#[test]
fn loop_offset_is_streaming_only() {
    let fx = Fixture::voices(2);
    let e = &fx.engine;
    e.create_sound("static", "ambience", SoundOptions::new()).unwrap();
    e.create_sound("stream", "ambience", SoundOptions::new().streaming(true))
        .unwrap();

    assert!(matches!(
        e.set_loop_offset("static", 1.0),
        Err(PetalSoundError::Unsupported(_))
    ));
    e.set_loop_offset("stream", 1.0).unwrap();
    assert!(e.set_loop_offset("stream", 11.0).is_err());
}

#[test]
fn give_up_voice_on_stop_returns_it_to_the_pool() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    e.create_sound("keep", "ambience", SoundOptions::new()).unwrap();
    e.create_sound("give", "ambience", SoundOptions::new()).unwrap();
    e.set_give_up_voice_on_stop("give", true).unwrap();

    e.play("keep").unwrap();
    e.stop("keep").unwrap();
    assert_eq!(e.free_voices(), 0);
    assert!(e.sound_info("keep").unwrap().has_voice);

    e.play("give").unwrap();
    e.stop("give").unwrap();
    assert_eq!(e.free_voices(), 1);
    assert!(e.active_sounds().is_empty());
}

#[test]
fn temporary_sound_is_destroyed_when_it_finishes() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e
        .create_sound("oneshot", "blip", SoundOptions::new().temporary(true))
        .unwrap();
    e.play(id).unwrap();

    fx.step(600);
    fx.step(0);

    assert_eq!(e.get_sound("oneshot"), None);
    assert_eq!(e.free_voices(), 1);
    let events = e.poll_events();
    assert!(events.contains(&PetalSoundEvent::SoundFinished { sound_id: id }));
    assert!(events.contains(&PetalSoundEvent::SoundDestroyed { sound_id: id }));
    assert!(!e.is_cached("blip"));
}

#[test]
fn pause_all_resumes_only_what_it_paused() {
    let fx = Fixture::voices(3);
    let e = &fx.engine;
    e.create_sound("a", "ambience", SoundOptions::new()).unwrap();
    e.create_sound("b", "ambience", SoundOptions::new()).unwrap();
    e.create_sound("idle", "ambience", SoundOptions::new()).unwrap();
    e.play("a").unwrap();
    e.play("b").unwrap();

    e.pause_all();
    assert_eq!(e.paused_sounds().len(), 2);
    assert_eq!(fx.state("a"), PlayState::Paused);

    e.resume_all();
    assert!(e.paused_sounds().is_empty());
    assert_eq!(fx.state("a"), PlayState::Playing);
    assert_eq!(fx.state("b"), PlayState::Playing);
    assert_eq!(fx.state("idle"), PlayState::Initial);
}

#[test]
fn paused_static_sound_resumes_where_it_left_off() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("speech", "ambience", SoundOptions::new()).unwrap();
    e.play(id).unwrap();
    fx.step(2000);

    e.pause(id).unwrap();
    fx.step(1000);
    let paused_at = e.play_position(id).unwrap();
    assert!((paused_at - 2.0).abs() < 0.01, "paused at {}", paused_at);

    e.play(id).unwrap();
    fx.step(1000);
    assert!((e.play_position(id).unwrap() - 3.0).abs() < 0.01);
}

#[test]
fn properties_reach_the_voice() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("bird", "ambience", SoundOptions::new()).unwrap();

    e.set_gain(id, 0.25).unwrap();
    e.set_pitch(id, -1.0).unwrap();
    e.set_position(id, Vec3::new(3.0, 0.0, 0.0)).unwrap();
    e.set_cone(id, 90.0, 400.0, 2.0).unwrap();

    let props = e.properties(id).unwrap();
    assert_eq!(props.gain, 0.25);
    assert_eq!(props.pitch, 1.0);
    assert_eq!(props.position, Vec3::new(3.0, 0.0, 0.0));
    assert_eq!(props.cone_outer_angle, 360.0);
    assert_eq!(props.cone_outer_gain, 1.0);

    // Cached properties are applied once a voice is attached
    e.play(id).unwrap();
    let mut out = vec![0.0f32; 200];
    fx.mixer.lock().render(&mut out);
    let right: f32 = out.iter().skip(1).step_by(2).map(|s| s.abs()).sum();
    let left: f32 = out.iter().step_by(2).map(|s| s.abs()).sum();
    assert!(right > left);
}

#[test]
fn transforms_are_followed_on_update() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("drone", "ambience", SoundOptions::new()).unwrap();

    let emitter = Arc::new(parking_lot::RwLock::new(Pose::from_position(Vec3::X)));
    let camera = Arc::new(parking_lot::RwLock::new(Pose::from_position(Vec3::new(0.0, 2.0, 0.0))));
    e.attach_transform(id, emitter.clone()).unwrap();
    e.attach_listener_transform(camera.clone());
    assert_eq!(e.properties(id).unwrap().position, Vec3::X);

    emitter.write().position = Vec3::new(0.0, 0.0, -5.0);
    camera.write().position = Vec3::new(1.0, 1.0, 1.0);
    e.update(TICK);

    assert_eq!(e.properties(id).unwrap().position, Vec3::new(0.0, 0.0, -5.0));
    assert_eq!(e.listener_pose().0, Vec3::new(1.0, 1.0, 1.0));
    assert_eq!(fx.mixer.lock().listener().position, Vec3::new(1.0, 1.0, 1.0));

    e.detach_transform(id).unwrap();
    emitter.write().position = Vec3::ZERO;
    e.update(TICK);
    assert_eq!(e.properties(id).unwrap().position, Vec3::new(0.0, 0.0, -5.0));
}

#[test]
fn global_settings_are_validated() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    e.set_master_volume(0.5);
    assert_eq!(e.master_volume(), 0.5);
    assert_eq!(fx.mixer.lock().master_gain(), 0.5);
    assert!(e.set_speed_of_sound(0.0).is_err());
    e.set_speed_of_sound(340.0).unwrap();
    assert_eq!(e.config().speed_of_sound, 340.0);
}

#[test]
fn background_thread_keeps_streams_fed() {
    let fx = Fixture::new(
        PetalSoundDesc::new()
            .max_voices(2)
            .scheduling(SchedulingMode::Background)
            .background_interval(Duration::from_millis(1)),
    );
    let e = &fx.engine;
    let id = e
        .create_sound("music", "loop", SoundOptions::new().streaming(true).looping(true))
        .unwrap();
    e.play(id).unwrap();

    // Nothing calls update(), so every wrap past the primed ring comes from
    // the streaming thread
    let events = e.events();
    let mut loops = 0;
    for _ in 0..60 {
        fx.mixer.advance(250);
        std::thread::sleep(Duration::from_millis(5));
        loops += events
            .try_iter()
            .filter(|ev| matches!(ev, PetalSoundEvent::SoundLooped { .. }))
            .count();
        if loops >= 3 {
            break;
        }
    }

    assert!(loops >= 3, "only {} loops", loops);
    assert_eq!(fx.state("music"), PlayState::Playing);
}

#[test]
fn shutdown_is_idempotent() {
    let mut fx = Fixture::voices(2);
    fx.engine.create_sound("a", "ambience", SoundOptions::new()).unwrap();
    fx.engine.play("a").unwrap();

    fx.engine.shutdown();
    fx.engine.shutdown();

    assert_eq!(fx.engine.stats().sounds, 0);
    assert_eq!(fx.mixer.lock().voice_count(), 0);
    assert_eq!(fx.mixer.lock().buffer_count(), 0);
    assert!(fx.engine.create_sound("b", "ambience", SoundOptions::new()).is_err());
}

#[test]
fn exhausted_one_shot_finishes_when_its_voice_is_taken() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let shot = e.create_sound("shot", "blip", SoundOptions::new().priority(9)).unwrap();
    let other = e.create_sound("other", "ambience", SoundOptions::new()).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    e.set_finished_callback(shot, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();

    e.play(shot).unwrap();
    // Past the end of the blip before any update notices
    fx.mixer.advance(600);
    e.play(other).unwrap();

    assert_eq!(fx.state("shot"), PlayState::Stopped);
    assert!(e.queued_sounds().is_empty());
    assert_eq!(e.active_sounds(), vec![other]);
    assert_eq!(finished.load(Ordering::Relaxed), 1);

    fx.step(0);
    fx.step(0);
    let events = e.poll_events();
    assert!(events.contains(&PetalSoundEvent::VoiceStolen { sound_id: shot, by: other }));
    assert!(events.contains(&PetalSoundEvent::SoundFinished { sound_id: shot }));
    assert!(!events.contains(&PetalSoundEvent::SoundReactivated { sound_id: shot }));
    assert_eq!(finished.load(Ordering::Relaxed), 1);
    assert_eq!(fx.state("other"), PlayState::Playing);
}

#[test]
fn starved_stream_resumes_where_it_ran_dry() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let music = e
        .create_sound("music", "ambience", SoundOptions::new().streaming(true).priority(1))
        .unwrap();
    e.create_sound("alarm", "ambience", SoundOptions::new().priority(9)).unwrap();

    e.play(music).unwrap();
    fx.step(600);
    // Drain the refilled ring without another update
    fx.mixer.advance(1200);
    assert!((e.play_position(music).unwrap() - 1.5).abs() < 0.01);

    e.play("alarm").unwrap();
    assert_eq!(e.queued_sounds(), vec![music]);
    assert!((e.play_position(music).unwrap() - 1.5).abs() < 0.01);

    e.stop("alarm").unwrap();
    fx.step(0);
    assert!(e.sound_info(music).unwrap().has_voice);
    assert!((e.play_position(music).unwrap() - 1.5).abs() < 0.01);
}

#[test]
fn looping_static_sound_reports_each_wrap() {
    let fx = Fixture::voices(1);
    let e = &fx.engine;
    let id = e.create_sound("chirp", "blip", SoundOptions::new().looping(true)).unwrap();
    let loops = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loops);
    e.set_loop_callback(id, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();

    e.play(id).unwrap();
    // 1.2 s of a 0.5 s buffer, wrapping between the 2nd and 4th ticks
    for _ in 0..4 {
        fx.step(300);
    }

    assert_eq!(loops.load(Ordering::Relaxed), 2);
    let looped = e
        .poll_events()
        .into_iter()
        .filter(|ev| matches!(ev, PetalSoundEvent::SoundLooped { sound_id, .. } if *sound_id == id))
        .count();
    assert_eq!(looped, 2);
    assert_eq!(fx.state("chirp"), PlayState::Playing);
    assert_eq!(e.sound_info(id).unwrap().loop_count, 2);
}
