use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sprec_recognizer::{GmmRecognizer, Recognizer, VqRecognizer};
use sprec_speech::{load_text_samples, speaker_id, SpeechData};
use tracing::{info, warn};

use crate::report::{RunReport, TestRecord};
use crate::schedule::{needs_background_reload, needs_train_reload, schedule};
use crate::script::{parse_script, RecognizerKind, Script, TestCase, TestKind};
use crate::EngineError;

/// Directory configuration for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the per-feature-set speaker data layout.
    pub data_dir: PathBuf,
    /// Directory receiving result, manifest and report files.
    pub out_dir: PathBuf,
}

/// Batch driver for recognition and verification experiments.
///
/// Parses a test script, sorts the requested descriptors so that
/// descriptors sharing a training configuration are adjacent, and
/// executes them sequentially while carrying the loaded training and
/// background corpora forward whenever the reuse key is unchanged.
pub struct TestEngine {
    config: EngineConfig,
}

impl TestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Runs the script at `path`. Grammar violations abort the run;
    /// missing speakers are logged and skipped.
    pub fn run(&self, path: &Path) -> Result<RunReport, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut script = parse_script(&text)?;
        schedule(&mut script.tests);

        std::fs::create_dir_all(&self.config.out_dir).map_err(|source| EngineError::Io {
            path: self.config.out_dir.clone(),
            source,
        })?;
        self.init_outputs(&script)?;

        let mut report = RunReport {
            script: path.display().to_string(),
            ..RunReport::default()
        };

        let mut vq = VqRecognizer::new();
        let mut gmm = GmmRecognizer::new();

        let mut train_data: Option<Arc<SpeechData>> = None;
        let mut background_data: Option<Arc<SpeechData>> = None;
        let mut previous: Option<&TestCase> = None;

        for test in &script.tests {
            if needs_train_reload(previous, test) {
                let mut data = SpeechData::new();
                load_text_samples(
                    &self.config.data_dir,
                    &test.features,
                    &mut data,
                    test.train_sf,
                    test.train_gf,
                    test.train_sl,
                    test.train_gl,
                    true,
                )?;
                train_data = Some(Arc::new(data));
                report.train_loads += 1;
            }

            if needs_background_reload(previous, test) {
                // The background pool comes from the run-wide %ubm
                // range; without the directive it stays empty and
                // background scoring degrades with a warning.
                let mut data = SpeechData::new();
                if let Some(range) = script.ubm {
                    load_text_samples(
                        &self.config.data_dir,
                        &test.features,
                        &mut data,
                        range.sf,
                        range.gf,
                        range.sl,
                        range.gl,
                        true,
                    )?;
                }
                background_data = Some(Arc::new(data));
                report.background_loads += 1;
            }

            let recognizer: &mut dyn Recognizer = match test.recognizer {
                RecognizerKind::Vq => {
                    vq.set_weighting_enabled(test.weighting);
                    &mut vq
                }
                RecognizerKind::Gmm => &mut gmm,
            };

            recognizer.set_order(test.order);
            recognizer.set_background_model_enabled(test.ubm);
            recognizer.set_adaptation_enabled(test.ubm);
            recognizer.set_score_normalization(test.normalization);
            recognizer.set_speaker_data(train_data.clone().expect("loaded above"));
            recognizer.set_background_data(background_data.clone().expect("loaded above"));

            match test.kind {
                TestKind::Recognition => {
                    info!("recognition test: {}", test.label());
                    self.recognize(test, recognizer, &mut report)?;
                }
                TestKind::Verification => {
                    info!("verification test: {}", test.label());
                    self.verify(test, recognizer, &mut report)?;
                }
            }

            previous = Some(test);
        }

        Ok(report)
    }

    /// Creates/clears the per-block result and manifest files and
    /// wires recognition target chaining.
    fn init_outputs(&self, script: &Script) -> Result<(), EngineError> {
        for (id, header) in &script.headers {
            let label = if header.label.is_empty() {
                id.clone()
            } else {
                header.label.clone()
            };

            match header.kind {
                TestKind::Recognition => {
                    self.create_file(&format!("{id}_rec.txt"), "")?;
                    if header.target.is_none() {
                        self.create_file(&format!("{id}.test"), &format!("{label}|rec\n"))?;
                    }
                }
                TestKind::Verification => {
                    if header.target.is_some() {
                        return Err(EngineError::TargetOnVerification { id: id.clone() });
                    }
                    self.create_file(&format!("{id}.test"), &format!("{label}|ver\n"))?;
                }
            }
        }

        // A recognition block with a target feeds its result file into
        // the target block's manifest instead of owning one.
        for (id, header) in &script.headers {
            if header.kind == TestKind::Recognition {
                if let Some(target) = &header.target {
                    self.append_file(
                        &format!("{target}.test"),
                        &format!("{id}_rec.txt|{}\n", header.label),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn recognize(
        &self,
        test: &TestCase,
        recognizer: &mut dyn Recognizer,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let result_file = format!("{}_rec.txt", test.id);

        // The nominal test speaker range is the trained model set.
        let speakers = self.loaded_keys(recognizer, test.test_sf, test.test_gf, "speaker");
        recognizer.select_speaker_models(&speakers);

        let mut correct = 0usize;
        let mut incorrect = 0usize;

        let mut sf = test.test_sf;
        for cycle in 0..test.cycles {
            info!("cycle {}/{}", cycle + 1, test.cycles);

            let mut test_data = SpeechData::new();
            load_text_samples(
                &self.config.data_dir,
                &test.features,
                &mut test_data,
                sf,
                test.test_gf,
                test.test_sl,
                test.test_gl,
                false,
            )?;

            for (key, samples) in test_data.samples() {
                if recognizer.is_recognized(key, samples) {
                    correct += 1;
                } else {
                    incorrect += 1;
                }
            }

            sf += test.test_gf;
        }

        self.append_file(
            &result_file,
            &format!("{} {correct} {incorrect}\n", test.label()),
        )?;

        report.tests.push(TestRecord {
            label: test.label(),
            kind: "rec".to_string(),
            result_file,
            correct: Some(correct),
            incorrect: Some(incorrect),
            trials: None,
        });
        Ok(())
    }

    fn verify(
        &self,
        test: &TestCase,
        recognizer: &mut dyn Recognizer,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let result_file = format!("{}_{}_ver.txt", test.id, test.index);
        let mut results = self.create_writer(&result_file)?;

        let impostors = self.loaded_keys(recognizer, test.si, test.gi, "impostor");
        recognizer.select_impostor_models(&impostors);

        let mut trials = 0usize;
        let mut sf = test.test_sf;

        for cycle in 0..test.cycles {
            info!("cycle {}/{}", cycle + 1, test.cycles);

            let speakers = self.loaded_keys(recognizer, sf, test.test_gf, "speaker");
            recognizer.select_speaker_models(&speakers);

            // One shared impostor-trial corpus per cycle, drawn from
            // the speakers directly after the claimed range.
            let mut impostor_data = SpeechData::new();
            load_text_samples(
                &self.config.data_dir,
                &test.features,
                &mut impostor_data,
                sf + test.test_gf,
                test.incorrect_claimed,
                test.test_sl,
                test.test_gl,
                false,
            )?;

            for j in 0..test.test_gf {
                let claimed = speaker_id(sf + j);

                // Genuine trial: the claimed speaker's held-out
                // utterance directly after the test sample range.
                let mut claimed_data = SpeechData::new();
                load_text_samples(
                    &self.config.data_dir,
                    &test.features,
                    &mut claimed_data,
                    sf + j,
                    1,
                    test.test_sl + test.test_gl,
                    test.correct_claimed,
                    false,
                )?;

                let genuine = recognizer.verify(&claimed, &claimed_data);
                write_scores(&mut results, &result_file, &genuine)?;
                let impostor = recognizer.verify(&claimed, &impostor_data);
                write_scores(&mut results, &result_file, &impostor)?;
                trials += 1;
            }

            sf += test.test_gf;
        }

        self.append_file(
            &format!("{}.test", test.id),
            &format!("{result_file}|{}\n", test.label()),
        )?;

        report.tests.push(TestRecord {
            label: test.label(),
            kind: "ver".to_string(),
            result_file,
            correct: None,
            incorrect: None,
            trials: Some(trials),
        });
        Ok(())
    }

    /// Keys of the requested speaker range that are present in the
    /// loaded training corpus; absent keys are logged and skipped.
    fn loaded_keys(
        &self,
        recognizer: &dyn Recognizer,
        start: usize,
        count: usize,
        role: &str,
    ) -> Vec<String> {
        let data = recognizer.speaker_data();
        (start..start + count)
            .map(speaker_id)
            .filter(|key| {
                let loaded = data
                    .as_ref()
                    .is_some_and(|d| d.speaker_samples(key).is_some());
                if !loaded {
                    warn!("{role} '{key}' not loaded");
                }
                loaded
            })
            .collect()
    }

    fn out_path(&self, name: &str) -> PathBuf {
        self.config.out_dir.join(name)
    }

    fn create_file(&self, name: &str, content: &str) -> Result<(), EngineError> {
        let path = self.out_path(name);
        std::fs::write(&path, content).map_err(|source| EngineError::Io { path, source })
    }

    fn create_writer(&self, name: &str) -> Result<File, EngineError> {
        let path = self.out_path(name);
        File::create(&path).map_err(|source| EngineError::Io { path, source })
    }

    fn append_file(&self, name: &str, content: &str) -> Result<(), EngineError> {
        let path = self.out_path(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| EngineError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(content.as_bytes())
            .map_err(|source| EngineError::Io { path, source })
    }
}

fn write_scores(file: &mut File, name: &str, scores: &[f64]) -> Result<(), EngineError> {
    let line = scores
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(file, "{line}").map_err(|source| EngineError::Io {
        path: PathBuf::from(name),
        source,
    })
}
