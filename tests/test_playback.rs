mod common;
use common::*;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use yolo_detector::{OutputSettings, OutputWriter};

#[test]
fn transitions_from_stopped_are_rejected() {
    let (mut controller, _rx) = controller(loaded_detector(), 5);

    for result in [controller.pause(), controller.resume(), controller.stop()] {
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                state: PlaybackState::Stopped,
                ..
            })
        ));
    }
    assert!(controller.toggle_pause().is_err());
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn start_requires_a_loaded_model() {
    let (mut controller, _rx) = controller(Arc::new(Detector::new()), 5);
    let (source, _) = ScriptedSource::frames(3);

    let err = controller
        .start_with("scripted", move || Ok(source.boxed()), None)
        .unwrap_err();
    assert!(matches!(err, Error::ModelNotLoaded));
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn unopenable_source_leaves_playback_stopped() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (mut controller, rx) = controller(loaded_detector(), 5);

    let err = controller
        .start(SourceSpec::Video(dir.path().join("missing.gif")))
        .unwrap_err();
    assert!(matches!(err, Error::Source { .. }));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[cfg(not(feature = "camera"))]
#[test]
fn camera_needs_the_camera_feature() {
    let (mut controller, _rx) = controller(loaded_detector(), 5);
    let err = controller.start(SourceSpec::Camera(0)).unwrap_err();
    assert!(matches!(err, Error::Source { .. }));
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn finite_video_stops_at_end_of_stream() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let frames = write_frame_dir(&dir.path().join("clip"), 3)?;
    let (mut controller, rx) = controller(loaded_detector(), 5);

    let session = controller.start(SourceSpec::Video(frames))?;
    assert_eq!(controller.state(), PlaybackState::Playing);

    let events = collect_until(&rx, is_finished);
    let described: Vec<String> = events.iter().map(describe).collect();
    assert_eq!(
        described,
        vec![
            format!("started({session})"),
            "state(playing)".to_string(),
            "frame(0)".to_string(),
            "frame(1)".to_string(),
            "frame(2)".to_string(),
            "state(stopped)".to_string(),
            "finished(EndOfStream, 3)".to_string(),
        ]
    );
    assert!(events.iter().all(|event| event.session() == session));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(controller.status().position, 3);
    Ok(())
}

#[test]
fn stop_releases_the_source_and_allows_restart() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let frames = write_frame_dir(&dir.path().join("clip"), 50)?;
    let (mut controller, rx) = controller(loaded_detector(), 20);

    let (source, released) = ScriptedSource::live();
    let first = controller.start_with("scripted", move || Ok(source.boxed()), None)?;
    controller.stop()?;
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(controller.state(), PlaybackState::Stopped);

    let events = collect_until(&rx, is_finished);
    assert!(matches!(
        events.last(),
        Some(PlaybackEvent::Finished {
            reason: StopReason::Requested,
            ..
        })
    ));

    // Same path twice in a row
    controller.start(SourceSpec::Video(frames.clone()))?;
    controller.stop()?;
    let second = controller.start(SourceSpec::Video(frames))?;
    assert!(second > first);
    controller.stop()?;
    Ok(())
}

#[test]
fn start_while_playing_is_rejected() -> anyhow::Result<()> {
    let (mut controller, _rx) = controller(loaded_detector(), 5);
    let (source, _) = ScriptedSource::live();
    controller.start_with("scripted", move || Ok(source.boxed()), None)?;

    let (other, _) = ScriptedSource::frames(1);
    let err = controller
        .start_with("other", move || Ok(other.boxed()), None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: "start",
            state: PlaybackState::Playing
        }
    ));
    assert_eq!(controller.state(), PlaybackState::Playing);
    controller.stop()?;
    Ok(())
}

#[test]
fn pause_and_resume_continue_from_the_same_position() -> anyhow::Result<()> {
    let (mut controller, rx) = controller(loaded_detector(), 10);
    let (source, _) = ScriptedSource::frames(12);
    controller.start_with("scripted", move || Ok(source.boxed()), None)?;

    let mut events = collect_until(&rx, |event| {
        matches!(event, PlaybackEvent::Frame(frame) if frame.index == 2)
    });

    controller.pause()?;
    assert_eq!(controller.state(), PlaybackState::Paused);
    assert!(controller.pause().is_err());

    events.extend(collect_until(&rx, |event| {
        matches!(
            event,
            PlaybackEvent::StateChanged {
                state: PlaybackState::Paused,
                ..
            }
        )
    }));
    let before_pause = frame_indices(&events);

    // Nothing is pulled while paused
    std::thread::sleep(Duration::from_millis(100));
    assert!(rx.try_iter().all(|event| !matches!(event, PlaybackEvent::Frame(_))));
    assert_eq!(controller.status().state, PlaybackState::Paused);

    controller.resume()?;
    assert_eq!(controller.state(), PlaybackState::Playing);
    let after = collect_until(&rx, is_finished);

    let mut indices = before_pause;
    indices.extend(frame_indices(&after));
    assert_eq!(indices, (0..12).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn toggle_pause_alternates() -> anyhow::Result<()> {
    let (mut controller, _rx) = controller(loaded_detector(), 5);
    let (source, _) = ScriptedSource::live();
    controller.start_with("scripted", move || Ok(source.boxed()), None)?;

    assert_eq!(controller.toggle_pause()?, PlaybackState::Paused);
    assert_eq!(controller.toggle_pause()?, PlaybackState::Playing);
    controller.stop()?;
    assert!(controller.toggle_pause().is_err());
    Ok(())
}

#[test]
fn failed_frames_are_reported_and_skipped() -> anyhow::Result<()> {
    let (mut controller, rx) = controller(loaded_detector(), 5);
    let (source, _) = ScriptedSource::new(vec![
        Ok(black_frame(32, 24)),
        Ok(black_frame(0, 0)),
        Ok(black_frame(32, 24)),
    ]);
    controller.start_with("scripted", move || Ok(source.boxed()), None)?;

    let events = collect_until(&rx, is_finished);
    let described: Vec<String> = events.iter().map(describe).collect();
    assert!(described.contains(&"failed(1)".to_string()), "{described:?}");
    assert_eq!(frame_indices(&events), vec![0, 2]);
    assert_eq!(
        described.last().map(String::as_str),
        Some("finished(EndOfStream, 2)")
    );
    Ok(())
}

#[test]
fn source_read_error_ends_the_session() -> anyhow::Result<()> {
    let (mut controller, rx) = controller(loaded_detector(), 5);
    let (source, released) = ScriptedSource::new(vec![
        Ok(black_frame(32, 24)),
        Err(Error::unavailable("scripted", "device unplugged")),
        Ok(black_frame(32, 24)),
    ]);
    controller.start_with("scripted", move || Ok(source.boxed()), None)?;

    let events = collect_until(&rx, is_finished);
    match events.last() {
        Some(PlaybackEvent::Finished {
            reason: StopReason::SourceFailed(message),
            frames,
            ..
        }) => {
            assert!(message.contains("device unplugged"));
            assert_eq!(*frames, 1);
        }
        other => panic!("unexpected final event {:?}", other.map(describe)),
    }
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    Ok(())
}

#[test]
fn sessions_get_distinct_ids() -> anyhow::Result<()> {
    let (mut controller, rx) = controller(loaded_detector(), 5);

    let (source, _) = ScriptedSource::frames(1);
    let first = controller.start_with("one", move || Ok(source.boxed()), None)?;
    collect_until(&rx, is_finished);

    let (source, _) = ScriptedSource::frames(1);
    let second = controller.start_with("two", move || Ok(source.boxed()), None)?;
    let events = collect_until(&rx, is_finished);

    assert_ne!(first, second);
    assert!(events.iter().all(|event| event.session() == second));
    Ok(())
}

#[test]
fn dropping_the_controller_stops_playback() {
    let (source, released) = ScriptedSource::live();
    {
        let (mut controller, _rx) = controller(loaded_detector(), 5);
        controller
            .start_with("scripted", move || Ok(source.boxed()), None)
            .unwrap();
    }
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn recorded_sessions_write_numbered_frames() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let frames = write_frame_dir(&dir.path().join("clip"), 3)?;
    let mut output = OutputWriter::new(OutputSettings {
        project: dir.path().join("runs"),
        ..OutputSettings::default()
    });
    let recorder = output.sequence("prediction")?.expect("saving is enabled");
    let recording = recorder.dir().to_path_buf();

    let (mut controller, rx) = controller(loaded_detector(), 5);
    controller.start_recording(SourceSpec::Video(frames), Some(recorder))?;
    collect_until(&rx, is_finished);

    assert_eq!(recording, dir.path().join("runs").join("exp").join("prediction"));
    for index in 0..3 {
        assert!(recording.join(format!("frame_{index:06}.jpg")).is_file());
    }
    assert!(!recording.join("frame_000003.jpg").exists());
    Ok(())
}

#[test]
fn stop_request_returns_while_a_read_is_blocked() -> anyhow::Result<()> {
    let (mut controller, rx) = controller(loaded_detector(), 5);
    let (source, gate, released) = HangingSource::new();
    let first = controller.start_with("hanging", move || Ok(source.boxed()), None)?;

    collect_until(&rx, |event| matches!(event, PlaybackEvent::Frame(_)));
    // Let the loop enter the blocking read
    std::thread::sleep(Duration::from_millis(50));

    let requested = Instant::now();
    controller.request_stop()?;
    assert!(
        requested.elapsed() < Duration::from_millis(500),
        "request_stop took {:?}",
        requested.elapsed()
    );
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert!(!released.load(Ordering::SeqCst));
    assert!(controller.pause().is_err());
    assert!(controller.request_stop().is_err());

    // A new session can run while the old read is still stuck
    let (next, _) = ScriptedSource::frames(3);
    let second = controller.start_with("next", move || Ok(next.boxed()), None)?;
    collect_until(&rx, |event| {
        matches!(event, PlaybackEvent::Finished { session, .. } if *session == second)
    });
    assert_eq!(controller.status().session, Some(second));
    assert_eq!(controller.status().position, 3);

    let _ = gate.send(());
    let events = collect_until(&rx, |event| {
        matches!(event, PlaybackEvent::Finished { session, .. } if *session == first)
    });
    assert!(matches!(
        events.last(),
        Some(PlaybackEvent::Finished {
            reason: StopReason::Requested,
            ..
        })
    ));
    assert!(released.load(Ordering::SeqCst));

    // The old session does not overwrite the newer one's status
    let status = controller.status();
    assert_eq!(status.session, Some(second));
    assert_eq!(status.position, 3);
    assert_eq!(status.state, PlaybackState::Stopped);
    Ok(())
}

#[test]
fn stop_joins_a_previously_requested_stop() -> anyhow::Result<()> {
    let (mut controller, _rx) = controller(loaded_detector(), 5);
    let (source, gate, released) = HangingSource::new();
    controller.start_with("hanging", move || Ok(source.boxed()), None)?;
    controller.request_stop()?;

    let (next, next_released) = ScriptedSource::live();
    controller.start_with("next", move || Ok(next.boxed()), None)?;

    let _ = gate.send(());
    controller.stop()?;
    assert!(released.load(Ordering::SeqCst));
    assert!(next_released.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn failed_start_removes_the_unused_recording() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut output = OutputWriter::new(OutputSettings {
        project: dir.path().join("runs"),
        ..OutputSettings::default()
    });
    let recorder = output.sequence("prediction")?.expect("saving is enabled");
    let recording = recorder.dir().to_path_buf();
    assert!(recording.is_dir());

    let (mut controller, _rx) = controller(loaded_detector(), 5);
    let err = controller
        .start_recording(SourceSpec::Video(dir.path().join("missing.gif")), Some(recorder))
        .unwrap_err();
    assert!(matches!(err, Error::Source { .. }));
    assert!(!recording.exists());

    // The name is free again for the next attempt
    let retry = output.sequence("prediction")?.expect("saving is enabled");
    assert_eq!(retry.dir(), recording);
    Ok(())
}
