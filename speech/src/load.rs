use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::{SpeechData, SpeechError};

/// Formats a speaker index as a corpus speaker id (zero-padded to
/// three digits, e.g. `7 -> "007"`).
pub fn speaker_id(index: usize) -> String {
    format!("{index:03}")
}

/// Loads feature vectors for a range of speakers into `data`.
///
/// Expects one file per speaker at `<root>/<feature_set>/<id>.txt`,
/// each line a whitespace-separated feature vector. Speakers
/// `sf .. sf+gf` are loaded; from each file the sample lines
/// `sl .. sl+gl` are taken. `train` only affects log output; training
/// and test loads share the layout.
///
/// A missing speaker file is logged and skipped so that experiment
/// batches tolerate partially-missing data. A malformed number is an
/// error for the whole load.
pub fn load_text_samples(
    root: &Path,
    feature_set: &str,
    data: &mut SpeechData,
    sf: usize,
    gf: usize,
    sl: usize,
    gl: usize,
    train: bool,
) -> Result<(), SpeechError> {
    for index in sf..sf + gf {
        let key = speaker_id(index);
        let path = root.join(feature_set).join(format!("{key}.txt"));

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("speaker '{key}' not loaded: {}: {e}", path.display());
                continue;
            }
        };

        let mut taken = 0usize;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| SpeechError::Io {
                path: path.clone(),
                source,
            })?;
            if line_no < sl {
                continue;
            }
            if line_no >= sl + gl {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut sample = Vec::new();
            for token in trimmed.split_whitespace() {
                let value: f32 =
                    token
                        .parse()
                        .map_err(|_| SpeechError::MalformedSample {
                            path: path.clone(),
                            line: line_no + 1,
                            reason: format!("not a number: '{token}'"),
                        })?;
                sample.push(value);
            }
            data.add_sample(&key, sample);
            taken += 1;
        }

        debug!(
            "loaded {taken} {} samples for speaker '{key}' from {feature_set}",
            if train { "training" } else { "test" }
        );
    }

    data.validate();
    data.normalize();
    Ok(())
}
