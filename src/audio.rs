use std::fs::File;
use std::io::Write;
use std::path::Path;

use hound::WavReader;

pub fn wav_duration_seconds(path: &Path) -> anyhow::Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

/// Write an ffmpeg concat-demuxer list. Entries are relative to the list's directory.
pub fn write_concat_list(list_path: &Path, entries: &[String]) -> std::io::Result<()> {
    let mut f = File::create(list_path)?;
    for entry in entries {
        writeln!(f, "file '{}'", entry.replace('\'', r"'\''"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    #[test]
    fn wav_duration_accounts_for_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        // 1.5 s of stereo silence
        for _ in 0..(8000 * 3 / 2 * 2) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let duration = wav_duration_seconds(&path).unwrap();
        assert!((duration - 1.5).abs() < 1e-9);
    }

    #[test]
    fn concat_list_quotes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("files.txt");
        write_concat_list(&list, &["audio/title.wav".into(), "audio/it's.wav".into()]).unwrap();
        let content = std::fs::read_to_string(&list).unwrap();
        assert_eq!(
            content,
            "file 'audio/title.wav'\nfile 'audio/it'\\''s.wav'\n"
        );
    }
}
