// Tests for gapless playback scheduling and interruption
//
// A manual clock stands in for the output device so timing is exact.

use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;
use treez_live::audio::AudioFrame;
use treez_live::client::{ManualClock, NullOutput, PlaybackClock, PlaybackOutput, PlaybackScheduler, WavOutput};

const EPSILON: f64 = 1e-9;

fn frame(samples: usize) -> AudioFrame {
    AudioFrame::new(vec![1000; samples], 24000)
}

fn scheduler() -> (Arc<ManualClock>, PlaybackScheduler<NullOutput>) {
    let clock = Arc::new(ManualClock::new());
    let output = NullOutput::with_clock(clock.clone(), 24000);
    (clock, PlaybackScheduler::new(output))
}

#[test]
fn test_back_to_back_buffers_are_contiguous() -> Result<()> {
    let (_clock, mut scheduler) = scheduler();

    let a = scheduler.schedule(&frame(2400))?;
    let b = scheduler.schedule(&frame(4800))?;
    let c = scheduler.schedule(&frame(1200))?;

    assert!((a.start - 0.0).abs() < EPSILON);
    assert!((b.start - a.end()).abs() < EPSILON);
    assert!((c.start - b.end()).abs() < EPSILON);
    assert!((scheduler.next_start_time() - 0.35).abs() < EPSILON);
    assert_eq!(scheduler.active_len(), 3);
    Ok(())
}

#[test]
fn test_starts_never_overlap_for_irregular_arrivals() -> Result<()> {
    let (clock, mut scheduler) = scheduler();
    // (delay before arrival, buffer length in samples)
    let arrivals = [
        (0.0, 4800),
        (0.05, 2400),
        (0.5, 960),
        (0.0, 24000),
        (0.01, 120),
        (3.0, 2400),
        (0.2, 7200),
    ];

    let mut previous: Option<(f64, f64)> = None;
    for (delay, len) in arrivals {
        clock.advance(delay);
        let buffer = scheduler.schedule(&frame(len))?;

        assert!(buffer.start >= clock.now() - EPSILON, "started in the past");
        if let Some((start, duration)) = previous {
            assert!(buffer.start >= start - EPSILON, "start went backwards");
            assert!(buffer.start >= start + duration - EPSILON, "overlaps previous buffer");
        }
        previous = Some((buffer.start, buffer.duration));
        scheduler.poll_ended();
    }
    Ok(())
}

#[test]
fn test_late_buffer_starts_now() -> Result<()> {
    let (clock, mut scheduler) = scheduler();

    scheduler.schedule(&frame(2400))?;
    clock.set(2.0);
    let late = scheduler.schedule(&frame(2400))?;

    assert!((late.start - 2.0).abs() < EPSILON);
    assert!((scheduler.next_start_time() - 2.1).abs() < EPSILON);
    Ok(())
}

#[test]
fn test_natural_end_removes_handle() -> Result<()> {
    let (clock, mut scheduler) = scheduler();

    let first = scheduler.schedule(&frame(2400))?;
    scheduler.schedule(&frame(2400))?;

    clock.set(0.15);
    assert_eq!(scheduler.poll_ended(), vec![first.id]);
    assert_eq!(scheduler.active_len(), 1);

    clock.set(0.2);
    assert_eq!(scheduler.poll_ended().len(), 1);
    assert_eq!(scheduler.active_len(), 0);
    Ok(())
}

#[test]
fn test_interrupt_clears_any_number_of_buffers() -> Result<()> {
    for count in [0usize, 1, 12] {
        let (clock, mut scheduler) = scheduler();
        clock.set(1.0);
        for _ in 0..count {
            scheduler.schedule(&frame(2400))?;
        }
        // Mid-playback
        clock.advance(0.05);

        assert_eq!(scheduler.interrupt(), count);
        assert_eq!(scheduler.active_len(), 0);
        assert!(scheduler.next_start_time() <= clock.now());

        // Stopped buffers never report a natural end
        clock.advance(10.0);
        assert!(scheduler.poll_ended().is_empty());
    }
    Ok(())
}

#[test]
fn test_schedule_after_interrupt_starts_now() -> Result<()> {
    let (clock, mut scheduler) = scheduler();

    scheduler.schedule(&frame(24000))?;
    clock.set(0.3);
    scheduler.interrupt();

    let next = scheduler.schedule(&frame(2400))?;
    assert!((next.start - 0.3).abs() < EPSILON);
    Ok(())
}

#[test]
fn test_long_sessions_do_not_drift() -> Result<()> {
    let (_clock, mut scheduler) = scheduler();

    // 7 samples at 24kHz has no exact binary duration
    for _ in 0..10_000 {
        scheduler.schedule(&frame(7))?;
    }
    let expected = 70_000.0 / 24000.0;
    assert!((scheduler.next_start_time() - expected).abs() < EPSILON);
    Ok(())
}

#[test]
fn test_wav_output_records_what_was_heard() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("playback.wav");
    let clock = Arc::new(ManualClock::new());

    let output = WavOutput::with_clock(&path, clock.clone(), 24000)?;
    let mut scheduler = PlaybackScheduler::new(output);

    scheduler.schedule(&frame(2400))?;
    scheduler.schedule(&frame(2400))?;
    // Second buffer cut off halfway
    clock.set(0.15);
    scheduler.interrupt();

    let mut output = scheduler.into_output();
    output.finish()?;

    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.duration(), 3600);
    Ok(())
}

#[test]
fn test_zero_rate_buffer_is_rejected() -> Result<()> {
    let (_clock, mut scheduler) = scheduler();

    let first = scheduler.schedule(&frame(2400))?;
    assert!(scheduler.schedule(&AudioFrame::new(vec![1000; 2400], 0)).is_err());
    assert!(scheduler.schedule(&AudioFrame::new(vec![1000; 2400], 0)).is_err());

    // The timeline is untouched by the rejected buffers
    let next = scheduler.schedule(&frame(2400))?;
    assert!((next.start - first.end()).abs() < EPSILON);
    assert_eq!(scheduler.active_len(), 2);
    Ok(())
}
