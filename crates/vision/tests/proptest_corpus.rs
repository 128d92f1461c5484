use image::{Rgb, RgbImage};
use proptest::prelude::*;
use vision::{Insert, TemplateCorpus};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However many images arrive, the corpus never holds more than its cap,
    /// and a repeated image never adds a file.
    #[test]
    fn corpus_never_exceeds_cap(
        cap in 1usize..6,
        values in prop::collection::vec(any::<u8>(), 1..20),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let corpus = TemplateCorpus::new(dir.path(), cap);

        for value in values {
            let image = RgbImage::from_pixel(3, 2, Rgb([value, 0, 0]));
            let before = corpus.len().unwrap();
            let outcome = corpus.insert(&image).unwrap();
            let after = corpus.len().unwrap();

            prop_assert!(after <= cap);
            if outcome == Insert::Duplicate {
                prop_assert_eq!(before, after);
            }
        }
    }
}
