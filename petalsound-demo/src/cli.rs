use anyhow::Result;
use petalsound::math::{Pose, Vec3};
use petalsound::{
    FadeAction, PetalSoundDesc, PetalSoundEngine, SchedulingMode, SoundOptions,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME: Duration = Duration::from_millis(16);

fn log_events(engine: &PetalSoundEngine) {
    for event in engine.poll_events() {
        if event.is_warning() {
            log::warn!("{:?}", event);
        } else {
            log::info!("{:?}", event);
        }
    }
}

/// Fade a looping sound in, circle it around the listener, fade it out.
pub fn run_orbit(path: &str, streaming: bool) -> Result<()> {
    let desc = PetalSoundDesc::new().scheduling(SchedulingMode::Background);
    let engine = PetalSoundEngine::with_default_output(desc)?;

    let emitter = Arc::new(parking_lot::RwLock::new(Pose::from_position(Vec3::new(
        0.0, 0.0, -2.0,
    ))));
    let id = engine.create_sound(
        "orbit",
        path,
        SoundOptions::new().streaming(streaming).looping(true),
    )?;
    engine.attach_transform(id, emitter.clone())?;
    engine.set_loop_callback(id, |id| log::info!("{} wrapped around", id))?;
    engine.start_fade(id, true, 1.0, FadeAction::None)?;

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(8) {
        let angle = start.elapsed().as_secs_f32() * 0.8;
        emitter.write().position = Vec3::new(angle.sin() * 2.0, 0.0, -angle.cos() * 2.0);
        engine.update(FRAME);
        log_events(&engine);
        std::thread::sleep(FRAME);
    }

    engine.start_fade(id, false, 1.0, FadeAction::Stop)?;
    for _ in 0..80 {
        engine.update(FRAME);
        log_events(&engine);
        std::thread::sleep(FRAME);
    }
    log::info!("Orbit finished at {:.2}s", engine.play_position(id)?);
    Ok(())
}

/// Three sounds competing for two voices.
pub fn run_preemption(path: &str) -> Result<()> {
    let desc = PetalSoundDesc::new().max_voices(2);
    let engine = PetalSoundEngine::with_default_output(desc)?;

    for (name, priority, x) in [("low", 1, -3.0), ("mid", 2, 3.0), ("high", 3, 0.0)] {
        let id = engine.create_sound(name, path, SoundOptions::new().looping(true).priority(priority))?;
        engine.set_position(id, Vec3::new(x, 0.0, -1.0))?;
        engine.set_gain(id, 0.4)?;
    }

    engine.play("low")?;
    engine.play("mid")?;
    std::thread::sleep(Duration::from_secs(2));
    engine.play("high")?;
    log_events(&engine);
    log::info!("Queued: {:?}", engine.queued_sounds());

    std::thread::sleep(Duration::from_secs(2));
    engine.stop("mid")?;
    for _ in 0..30 {
        engine.update(FRAME);
        log_events(&engine);
        std::thread::sleep(FRAME);
    }

    log::info!("{:?}", engine.stats());
    engine.stop_all();
    Ok(())
}
