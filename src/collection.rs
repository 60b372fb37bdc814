use rand::{SeedableRng, rngs::StdRng};

use crate::{
    catalog::{TraitCatalog, combination_space, participating_layers},
    combinator::{Combinator, DedupSet, Signature},
    config::GenerateRequest,
    foundation::{
        cancel::CancelToken,
        error::{ForgeError, ForgeResult},
    },
    registry::{Artifact, ArtifactRegistry},
    render::Compositor,
    store::KvStore,
};

/// How a batch ended.
#[derive(Debug)]
pub enum GenerationOutcome {
    /// Every requested artifact was produced.
    Completed,
    /// The combination space ran out first.
    Exhausted,
    /// Every composition still free uses a trait that failed to decode in this batch.
    Unrenderable,
    /// Cancelled or storage failure.
    Aborted(ForgeError),
}

/// Result of one [`Collection::generate`] call.
#[derive(Debug)]
pub struct GenerationReport {
    pub requested: usize,
    /// Artifacts registered by this call, in id order.
    pub artifacts: Vec<Artifact>,
    pub outcome: GenerationOutcome,
    /// One entry per trait that did not decode; each was barred for the rest of the batch.
    pub decode_failures: Vec<ForgeError>,
    pub attempts: u64,
    pub duplicates: u64,
}

impl GenerationReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Completed)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Exhausted)
    }

    /// Stopped short because the rest of the space needs traits that did not decode.
    pub fn is_unrenderable(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Unrenderable)
    }

    pub fn error(&self) -> Option<&ForgeError> {
        match &self.outcome {
            GenerationOutcome::Aborted(e) => Some(e),
            _ => None,
        }
    }
}

/// Space summary for the current catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpaceSummary {
    pub layers: usize,
    pub space: u128,
    pub remaining: u128,
}

/// A collection's lifetime state: every accepted signature plus the artifact registry.
///
/// Built once and reused across batches, so uniqueness and id order hold across calls.
#[derive(Debug)]
pub struct Collection<S> {
    dedup: DedupSet,
    registry: ArtifactRegistry<S>,
}

impl<S: KvStore> Collection<S> {
    /// Start an empty collection persisting into `store`.
    pub fn new(store: S) -> Self {
        Self {
            dedup: DedupSet::new(),
            registry: ArtifactRegistry::new(store),
        }
    }

    /// Reopen a collection from the artifacts already persisted in `store`.
    pub fn open(store: S) -> ForgeResult<Self> {
        let registry = ArtifactRegistry::restore(store)?;
        let mut dedup = DedupSet::new();
        for artifact in registry.all() {
            if !dedup.insert(Signature::new(artifact.traits.clone())) {
                return Err(ForgeError::storage(format!(
                    "artifact {} repeats an earlier trait combination",
                    artifact.id
                )));
            }
        }
        Ok(Self { dedup, registry })
    }

    pub fn registry(&self) -> &ArtifactRegistry<S> {
        &self.registry
    }

    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    pub fn artifacts(&self) -> &[Artifact] {
        self.registry.all()
    }

    /// Forget every signature and artifact, including persisted records.
    pub fn reset(&mut self) -> ForgeResult<()> {
        self.registry.clear()?;
        self.dedup.clear();
        tracing::info!("collection reset");
        Ok(())
    }

    pub fn space(&self, catalog: &(impl TraitCatalog + ?Sized)) -> ForgeResult<SpaceSummary> {
        let layers = participating_layers(catalog)?;
        let comb = Combinator::new(&layers, &self.dedup, StdRng::seed_from_u64(0), 0);
        Ok(SpaceSummary {
            layers: layers.len(),
            space: combination_space(&layers),
            remaining: comb.remaining(),
        })
    }

    /// Generate up to `request.batch_size` new artifacts.
    ///
    /// Configuration problems fail before any work. Everything else is reported through
    /// [`GenerationReport::outcome`], with artifacts registered so far kept.
    #[tracing::instrument(
        skip(self, catalog, request, cancel),
        fields(canvas = request.canvas_size, batch = request.batch_size)
    )]
    pub fn generate(
        &mut self,
        catalog: &(impl TraitCatalog + ?Sized),
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> ForgeResult<GenerationReport> {
        let request = request.clone().validated()?;
        let layers = participating_layers(catalog)?;
        let mut compositor = Compositor::new(request.canvas_size)?;

        let rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut comb = Combinator::new(&layers, &self.dedup, rng, request.duplicate_budget);
        tracing::info!(
            layers = layers.len(),
            space = %comb.space(),
            remaining = %comb.remaining(),
            "generation started"
        );

        let first_new = self.registry.count();
        let mut accepted = 0usize;
        let mut decode_failures = Vec::new();

        let outcome = loop {
            if accepted == request.batch_size {
                break GenerationOutcome::Completed;
            }

            let comp = match comb.next(&mut self.dedup, cancel) {
                Ok(Some(comp)) => comp,
                Ok(None) if comb.is_exhausted() => {
                    tracing::warn!(
                        accepted,
                        requested = request.batch_size,
                        "combination space exhausted"
                    );
                    break GenerationOutcome::Exhausted;
                }
                Ok(None) => {
                    tracing::warn!(
                        accepted,
                        requested = request.batch_size,
                        barred = decode_failures.len(),
                        "remaining compositions need traits that failed to decode"
                    );
                    break GenerationOutcome::Unrenderable;
                }
                Err(e) => break GenerationOutcome::Aborted(e),
            };

            let png = match compositor.render(&layers, &comp, cancel) {
                Ok(png) => png,
                Err(e) => {
                    comb.release(&mut self.dedup, &comp);
                    if e.aborts_batch() {
                        break GenerationOutcome::Aborted(e);
                    }
                    if let ForgeError::Decode {
                        layer, trait_name, ..
                    } = &e
                    {
                        comb.bar_trait(&self.dedup, *layer, trait_name);
                    }
                    tracing::warn!(error = %e, "composition dropped, trait barred");
                    decode_failures.push(e);
                    continue;
                }
            };

            accepted += 1;
            match self.registry.register(comp.trait_names(), png) {
                Ok(id) => {
                    tracing::debug!(id, traits = ?comp.signature().names(), "artifact registered");
                }
                Err(e) => {
                    tracing::error!(error = %e, "persisting artifact failed, aborting batch");
                    break GenerationOutcome::Aborted(e);
                }
            }
        };

        let artifacts = self.registry.all()[first_new..].to_vec();
        tracing::info!(
            accepted = artifacts.len(),
            attempts = comb.attempts(),
            duplicates = comb.duplicates(),
            decode_failures = decode_failures.len(),
            outcome = ?outcome,
            "generation finished"
        );

        Ok(GenerationReport {
            requested: request.batch_size,
            artifacts,
            outcome,
            decode_failures,
            attempts: comb.attempts(),
            duplicates: comb.duplicates(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        catalog::{Layer, Trait},
        store::MemoryStore,
    };

    fn png(px: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba(px));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn catalog() -> Vec<Layer> {
        vec![
            Layer::new(
                0,
                vec![
                    Trait::new("A", png([255, 0, 0, 255])),
                    Trait::new("B", png([0, 255, 0, 255])),
                ],
            ),
            Layer::new(
                1,
                vec![
                    Trait::new("X", png([0, 0, 255, 128])),
                    Trait::new("Y", png([0, 0, 0, 0])),
                ],
            ),
        ]
    }

    fn request(batch: usize) -> GenerateRequest {
        GenerateRequest::new(4, batch).with_seed(42)
    }

    #[test]
    fn full_space_completes_without_exhaustion_flag() {
        let mut coll = Collection::new(MemoryStore::new());
        let report = coll
            .generate(&catalog(), &request(4), &CancelToken::new())
            .unwrap();
        assert!(report.is_completed());
        assert_eq!(report.artifacts.len(), 4);
        assert_eq!(coll.dedup().len(), 4);

        let again = coll
            .generate(&catalog(), &request(1), &CancelToken::new())
            .unwrap();
        assert!(again.is_exhausted());
        assert!(again.artifacts.is_empty());
    }

    #[test]
    fn oversized_batch_reports_exhaustion() {
        let mut coll = Collection::new(MemoryStore::new());
        let report = coll
            .generate(&catalog(), &request(5), &CancelToken::new())
            .unwrap();
        assert!(report.is_exhausted());
        assert_eq!(report.artifacts.len(), 4);
        let ids: Vec<u64> = report.artifacts.iter().map(|a| a.id).collect();
        assert_eq!(ids, [1, 2, 3, 4]);
    }

    #[test]
    fn configuration_errors_do_no_work() {
        let mut coll = Collection::new(MemoryStore::new());
        let empty = vec![Layer::new(0, vec![])];
        assert!(matches!(
            coll.generate(&empty, &request(1), &CancelToken::new()),
            Err(ForgeError::Configuration(_))
        ));
        assert!(matches!(
            coll.generate(&catalog(), &GenerateRequest::new(0, 1), &CancelToken::new()),
            Err(ForgeError::Configuration(_))
        ));
        assert_eq!(coll.registry().count(), 0);
    }

    #[test]
    fn decode_failures_are_not_reported_as_exhaustion() {
        let layers = vec![Layer::new(
            0,
            vec![
                Trait::new("good", png([1, 2, 3, 255])),
                Trait::new("bad", b"not a png".to_vec()),
            ],
        )];
        let mut coll = Collection::new(MemoryStore::new());
        let report = coll
            .generate(&layers, &request(2), &CancelToken::new())
            .unwrap();

        assert!(report.is_unrenderable());
        assert!(!report.is_exhausted());
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].traits, ["good"]);
        assert_eq!(report.decode_failures.len(), 1);
        assert_eq!(coll.dedup().len(), coll.registry().count());
        assert_eq!(coll.space(&layers).unwrap().remaining, 1);
    }

    #[test]
    fn one_bad_trait_does_not_abort_a_batch_with_room_left() {
        let good: Vec<Trait> = (0..40)
            .map(|i| Trait::new(format!("t{i}"), png([i as u8, 0, 0, 255])))
            .collect();
        let layers = vec![
            Layer::new(
                0,
                vec![
                    Trait::new("good", png([9, 9, 9, 255])),
                    Trait::new("bad", vec![0u8; 3]),
                ],
            ),
            Layer::new(1, good),
        ];
        let mut coll = Collection::new(MemoryStore::new());
        let report = coll
            .generate(
                &layers,
                &GenerateRequest::new(4, 30).with_seed(1),
                &CancelToken::new(),
            )
            .unwrap();

        assert!(report.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.artifacts.len(), 30);
        assert!(report.artifacts.iter().all(|a| a.traits[0] == "good"));
        assert_eq!(report.decode_failures.len(), 1);
        assert_eq!(coll.dedup().len(), 30);
    }

    #[test]
    fn storage_failure_aborts_but_keeps_memory() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let mut coll = Collection::new(&store);
        let report = coll
            .generate(&catalog(), &request(3), &CancelToken::new())
            .unwrap();
        assert!(matches!(report.error(), Some(ForgeError::Storage(_))));
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(coll.dedup().len(), 1);
    }

    #[test]
    fn cancelled_batch_is_aborted() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut coll = Collection::new(MemoryStore::new());
        let report = coll.generate(&catalog(), &request(2), &cancel).unwrap();
        assert!(matches!(report.error(), Some(ForgeError::Cancelled)));
        assert!(report.artifacts.is_empty());
    }

    #[test]
    fn cancel_mid_render_keeps_registered_artifacts_only() {
        let layers = vec![
            Layer::new(0, vec![Trait::new("base", png([0, 0, 0, 255]))]),
            Layer::new(
                1,
                (0..10)
                    .map(|i| Trait::new(format!("top{i}"), png([0, i as u8, 0, 128])))
                    .collect(),
            ),
        ];
        let mut req = request(10);
        req.duplicate_budget = 0;
        // Three checks per composition (draw plus one per layer); the fourth composition
        // is cancelled between its two layers.
        let cancel = CancelToken::with_check_limit(3 * 3 + 2);

        let mut coll = Collection::new(MemoryStore::new());
        let report = coll.generate(&layers, &req, &cancel).unwrap();

        assert!(matches!(report.error(), Some(ForgeError::Cancelled)));
        assert_eq!(report.artifacts.len(), 3);
        assert_eq!(coll.registry().count(), 3);
        assert_eq!(coll.dedup().len(), coll.registry().count());
        for artifact in &report.artifacts {
            assert!(coll.dedup().contains(&Signature::new(artifact.traits.clone())));
        }
        assert_eq!(coll.space(&layers).unwrap().remaining, 7);
    }

    #[test]
    fn storage_hole_is_filled_by_the_next_batch() {
        let store = MemoryStore::new();
        {
            let mut coll = Collection::new(&store);
            coll.generate(&catalog(), &request(1), &CancelToken::new())
                .unwrap();
            store.fail_writes(true);
            let failed = coll
                .generate(&catalog(), &request(1), &CancelToken::new())
                .unwrap();
            assert!(matches!(failed.error(), Some(ForgeError::Storage(_))));
            store.fail_writes(false);
            let report = coll
                .generate(&catalog(), &request(1), &CancelToken::new())
                .unwrap();
            assert!(report.is_completed());
            assert_eq!(report.artifacts[0].id, 3);
        }

        let coll = Collection::open(&store).unwrap();
        assert_eq!(coll.registry().count(), 3);
        assert_eq!(coll.dedup().len(), 3);
    }

    #[test]
    fn reopen_restores_ids_and_uniqueness() {
        let store = MemoryStore::new();
        {
            let mut coll = Collection::new(&store);
            coll.generate(&catalog(), &request(3), &CancelToken::new())
                .unwrap();
        }
        let mut coll = Collection::open(&store).unwrap();
        assert_eq!(coll.space(&catalog()).unwrap().remaining, 1);

        let report = coll
            .generate(&catalog(), &request(3), &CancelToken::new())
            .unwrap();
        assert!(report.is_exhausted());
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].id, 4);
    }

    #[test]
    fn reset_starts_over() {
        let store = MemoryStore::new();
        let mut coll = Collection::new(&store);
        coll.generate(&catalog(), &request(4), &CancelToken::new())
            .unwrap();
        coll.reset().unwrap();
        assert!(coll.dedup().is_empty());
        assert!(store.is_empty());

        let report = coll
            .generate(&catalog(), &request(1), &CancelToken::new())
            .unwrap();
        assert_eq!(report.artifacts[0].id, 1);
    }
}
