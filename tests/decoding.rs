use humantracking::body::BodyPipeline;
use humantracking::config::{BodyConfig, BodyModelKind, DetectorConfig, MatchConfig};
use humantracking::descriptor::{find_match, similarity, Descriptor};
use humantracking::detection::non_max_suppression;
use humantracking::geometry::BoundingBox;
use humantracking::{Config, CpuKernels, GraphModel};
use ndarray::{Array4, ArrayD};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// PoseNet heads on a 9x9 grid with a single nose peak at cell (4, 4).
struct NosePeak;

impl GraphModel for NosePeak {
    fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
        let offsets = Array4::<f32>::zeros((1, 9, 9, 34));
        let mut heatmaps = Array4::<f32>::from_elem((1, 9, 9, 17), -10.0);
        heatmaps[[0, 4, 4, 0]] = 3.0;
        let fwd = Array4::<f32>::zeros((1, 9, 9, 32));
        let bwd = Array4::<f32>::zeros((1, 9, 9, 32));
        Ok(vec![
            offsets.into_dyn(),
            heatmaps.into_dyn(),
            fwd.into_dyn(),
            bwd.into_dyn(),
        ])
    }

    fn input_size(&self) -> usize {
        128
    }
}

#[test]
fn test_posenet_single_peak_through_pipeline() {
    init_tracing();
    let config = BodyConfig {
        model: BodyModelKind::PoseNet,
        detector: DetectorConfig {
            min_confidence: 0.3,
            max_detected: 5,
            ..DetectorConfig::default()
        },
        ..BodyConfig::default()
    };
    let mut body = BodyPipeline::new(Box::new(NosePeak), config);
    let image = Array4::<f32>::zeros((1, 256, 256, 3));
    let bodies = body.predict(&image, &CpuKernels, 0, false).unwrap();

    assert_eq!(bodies.len(), 1);
    let pose = &bodies[0];
    assert_eq!(pose.score, 0.95);
    assert_eq!(pose.keypoints.len(), 1);
    let nose = pose.keypoint("nose").unwrap();
    // cell 4 at stride 16 is 64px of a 128px input, half the frame
    assert_eq!(nose.position.x, 128.0);
    assert_eq!(nose.position.y, 128.0);
    assert_eq!(nose.position_raw.x, 0.5);
}

#[test]
fn test_posenet_rejects_missing_heads() {
    struct TwoHeads;

    impl GraphModel for TwoHeads {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            Ok(vec![ArrayD::zeros(vec![1, 9, 9, 17]); 2])
        }

        fn input_size(&self) -> usize {
            128
        }
    }

    let config = BodyConfig {
        model: BodyModelKind::PoseNet,
        ..BodyConfig::default()
    };
    let mut body = BodyPipeline::new(Box::new(TwoHeads), config);
    let image = Array4::<f32>::zeros((1, 64, 64, 3));
    assert!(body.predict(&image, &CpuKernels, 0, false).is_err());
}

#[test]
fn test_runtime_failure_propagates() {
    struct Failing;

    impl GraphModel for Failing {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            anyhow::bail!("device lost")
        }

        fn input_size(&self) -> usize {
            192
        }
    }

    let mut body = BodyPipeline::new(Box::new(Failing), BodyConfig::default());
    let image = Array4::<f32>::zeros((1, 64, 64, 3));
    let err = body.predict(&image, &CpuKernels, 0, false).unwrap_err();
    assert!(matches!(err, humantracking::Error::Runtime(_)));
}

#[test]
fn test_nms_idempotent() {
    let boxes = vec![
        BoundingBox::new(0.0, 0.0, 0.5, 0.5),
        BoundingBox::new(0.05, 0.05, 0.55, 0.55),
        BoundingBox::new(0.6, 0.6, 0.9, 0.9),
        BoundingBox::new(0.1, 0.6, 0.3, 0.9),
    ];
    let scores = vec![0.9, 0.8, 0.7, 0.1];
    let kept = non_max_suppression(&boxes, &scores, 10, 0.3, 0.2);
    assert_eq!(kept, vec![0, 2]);

    let kept_boxes: Vec<BoundingBox> = kept.iter().map(|&i| boxes[i]).collect();
    let kept_scores: Vec<f32> = kept.iter().map(|&i| scores[i]).collect();
    let again = non_max_suppression(&kept_boxes, &kept_scores, 10, 0.3, 0.2);
    assert_eq!(again, vec![0, 1]);
}

#[test]
fn test_gallery_lookup() {
    let config = Config::from_toml_str(
        r#"
        [matching]
        order = 2.0
        "#,
    )
    .unwrap();
    let options: &MatchConfig = &config.matching;

    let query: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
    let far = Descriptor::new(query.iter().map(|v| v + 0.5).collect());
    let near = Descriptor::new(query.iter().map(|v| v + 0.01).collect());
    let short = Descriptor::new(vec![0.0; 32]);

    let found = find_match(&query, &[short, far, near], options);
    assert_eq!(found.index, Some(2));
    assert!(found.similarity > 0.99);
    assert_eq!(similarity(&query, &query, 2.0), 1.0);
}
