//! Audio and speech-stage integration tests
//!
//! Runs without network access or audio hardware

use reva_voice::audio::{
    INPUT_SAMPLE_RATE, VadAnalyzer, VadEvent, VadParams, VadState, pcm16_from_le_bytes,
    pcm16_to_le_bytes, pcm16_to_wav, rms_energy, wav_to_pcm16,
};
use reva_voice::pipeline::{Frame, FrameProcessor, FrameSender, PipelineParams};
use reva_voice::services::TtsProcessor;
use tokio::sync::mpsc;

mod common;
use common::{FakeSynth, silence, speech};

/// Run audio through a detector in 20 ms chunks, collecting transitions
fn detect(vad: &mut VadAnalyzer, pcm: &[i16]) -> Vec<VadEvent> {
    pcm.chunks(320).filter_map(|chunk| vad.analyze(chunk)).collect()
}

#[test]
fn test_rms_energy_bounds() {
    assert!(rms_energy(&[]).abs() < f32::EPSILON);
    assert!(rms_energy(&silence(0.1, INPUT_SAMPLE_RATE)).abs() < f32::EPSILON);

    let loud = rms_energy(&speech(0.1, INPUT_SAMPLE_RATE));
    assert!(loud > 0.2 && loud <= 1.0, "unexpected energy {loud}");
}

#[test]
fn test_vad_detects_one_turn() {
    let mut vad = VadAnalyzer::new(VadParams::default(), INPUT_SAMPLE_RATE);

    let mut pcm = silence(0.5, INPUT_SAMPLE_RATE);
    pcm.extend(speech(1.0, INPUT_SAMPLE_RATE));
    pcm.extend(silence(1.0, INPUT_SAMPLE_RATE));

    assert_eq!(
        detect(&mut vad, &pcm),
        vec![VadEvent::SpeechStarted, VadEvent::SpeechStopped]
    );
    assert_eq!(vad.state(), VadState::Quiet);
}

#[test]
fn test_vad_short_pause_keeps_turn() {
    let mut vad = VadAnalyzer::new(VadParams::default(), INPUT_SAMPLE_RATE);

    let mut pcm = speech(0.5, INPUT_SAMPLE_RATE);
    pcm.extend(silence(0.3, INPUT_SAMPLE_RATE));
    pcm.extend(speech(0.5, INPUT_SAMPLE_RATE));

    assert_eq!(detect(&mut vad, &pcm), vec![VadEvent::SpeechStarted]);
    assert!(vad.is_speaking());

    vad.reset();
    assert_eq!(vad.state(), VadState::Quiet);
}

#[test]
fn test_pcm_bytes_are_little_endian() {
    let bytes = pcm16_to_le_bytes(&[1, -2, i16::MAX]);
    assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0xFF, 0x7F]);
    assert_eq!(pcm16_from_le_bytes(&bytes), vec![1, -2, i16::MAX]);

    // A dangling odd byte is dropped
    assert_eq!(pcm16_from_le_bytes(&[0x01, 0x00, 0x05]), vec![1]);
}

#[test]
fn test_wav_encoding() {
    let samples = speech(0.25, INPUT_SAMPLE_RATE);
    let wav = pcm16_to_wav(&samples, INPUT_SAMPLE_RATE).unwrap();

    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    let (decoded, rate) = wav_to_pcm16(&wav).unwrap();
    assert_eq!(rate, INPUT_SAMPLE_RATE);
    assert_eq!(decoded, samples);
}

#[test]
fn test_garbage_is_not_wav() {
    assert!(wav_to_pcm16(b"definitely not audio").is_err());
}

#[test]
fn test_tts_speaks_each_sentence() {
    tokio_test::block_on(async {
        let synth = FakeSynth::new();
        let mut stage = TtsProcessor::new(synth.clone());
        let (tx, mut rx) = mpsc::channel(64);
        let downstream = FrameSender::new(tx);

        let frames = vec![
            Frame::Start(PipelineParams::default()),
            Frame::LlmResponseStart,
            Frame::LlmText("Cheers! Our Andheri ".into()),
            Frame::LlmText("taproom opens at noon. See".into()),
            Frame::LlmText(" you there".into()),
            Frame::LlmResponseEnd,
        ];
        for frame in frames {
            stage.process_frame(frame, &downstream).await.unwrap();
        }
        drop(downstream);

        assert_eq!(
            *synth.spoken.lock().await,
            vec![
                "Cheers!".to_string(),
                "Our Andheri taproom opens at noon.".to_string(),
                "See you there".to_string()
            ]
        );

        let mut kinds = Vec::new();
        while let Some(frame) = rx.recv().await {
            kinds.push(frame.kind());
        }
        assert_eq!(kinds.iter().filter(|k| **k == "output_audio").count(), 3);
        assert_eq!(kinds.iter().filter(|k| **k == "tts_started").count(), 1);
        assert_eq!(
            kinds.iter().rev().take(2).collect::<Vec<_>>(),
            vec![&"llm_response_end", &"tts_stopped"]
        );
        assert!(!kinds.contains(&"metrics"));
    });
}
