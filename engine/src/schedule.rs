use crate::script::TestCase;

/// Sorts descriptors so that tests sharing expensive state become
/// adjacent: same feature set and training range first (training
/// corpus reuse), then model order and the remaining configuration
/// (trained model reuse), recognizer kind last.
pub fn schedule(tests: &mut [TestCase]) {
    tests.sort_by(|a, b| {
        (
            &a.features,
            a.train_sf,
            a.train_gf,
            a.train_sl,
            a.train_gl,
            a.order,
            a.normalization,
            a.weighting,
            a.ubm,
            a.recognizer,
        )
            .cmp(&(
                &b.features,
                b.train_sf,
                b.train_gf,
                b.train_sl,
                b.train_gl,
                b.order,
                b.normalization,
                b.weighting,
                b.ubm,
                b.recognizer,
            ))
    });
}

/// True when the training corpus of `next` cannot be taken over from
/// the previously executed descriptor.
pub fn needs_train_reload(previous: Option<&TestCase>, next: &TestCase) -> bool {
    match previous {
        None => true,
        Some(p) => {
            p.features != next.features
                || p.train_sf != next.train_sf
                || p.train_gf != next.train_gf
                || p.train_sl != next.train_sl
                || p.train_gl != next.train_gl
        }
    }
}

/// True when the background corpus must be reloaded: it only depends
/// on the feature set, the `%ubm` range is fixed per run.
pub fn needs_background_reload(previous: Option<&TestCase>, next: &TestCase) -> bool {
    match previous {
        None => true,
        Some(p) => p.features != next.features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_script;

    fn parsed(lines: &str) -> Vec<TestCase> {
        parse_script(lines).unwrap().tests
    }

    #[test]
    fn sorting_groups_shared_training_ranges() {
        let mut tests = parsed(
            "%t1 rec\n\
             feat_b vq 0 2 0 5 0 2 0 5 1\n\
             feat_a vq 0 2 0 5 0 2 0 5 1\n\
             feat_a vq 4 2 0 5 0 2 0 5 1\n\
             feat_a vq 0 2 0 5 0 2 0 5 1 -o 8\n",
        );
        schedule(&mut tests);

        // feat_a runs first, its two (0,2,0,5) descriptors adjacent.
        assert_eq!(tests[0].features, "feat_a");
        assert_eq!(tests[0].train_sf, 0);
        assert_eq!(tests[1].train_sf, 0);
        assert_eq!(tests[2].train_sf, 4);
        assert_eq!(tests[3].features, "feat_b");
    }

    #[test]
    fn one_load_per_distinct_training_key() {
        let mut tests = parsed(
            "%t1 rec\n\
             feat vq 0 2 0 5 0 2 0 5 1\n\
             feat vq 0 2 0 5 0 2 0 5 1 -o 8\n\
             feat vq 0 2 0 5 0 2 0 5 1 -wt\n\
             feat gmm 0 2 0 5 0 2 0 5 1\n\
             feat vq 4 2 0 5 0 2 0 5 1\n",
        );
        schedule(&mut tests);

        let mut loads = 0;
        let mut previous: Option<&TestCase> = None;
        for t in &tests {
            if needs_train_reload(previous, t) {
                loads += 1;
            }
            previous = Some(t);
        }
        // Two distinct (features, train range) keys, two loads for
        // five descriptors.
        assert_eq!(loads, 2);
    }

    #[test]
    fn background_reloads_only_on_feature_change() {
        let mut tests = parsed(
            "%t1 rec\n\
             feat_a vq 0 2 0 5 0 2 0 5 1\n\
             feat_a vq 4 2 0 5 0 2 0 5 1\n\
             feat_b vq 0 2 0 5 0 2 0 5 1\n",
        );
        schedule(&mut tests);

        let mut loads = 0;
        let mut previous: Option<&TestCase> = None;
        for t in &tests {
            if needs_background_reload(previous, t) {
                loads += 1;
            }
            previous = Some(t);
        }
        assert_eq!(loads, 2);
    }
}
