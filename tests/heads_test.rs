use ndarray::{Array3, Array4};
use yolo_heads_rs::layer::{Identity, Linear, PointwiseConv};
use yolo_heads_rs::{
    AnchorHeadParts, BoxedLayer, ClassifyParts, ClassifyV8, DecoupledBranches, DetectV5,
    DetectV6R1, DetectV6R3, DetectV6R4m, DetectV6R4s, DetectV7, DetectV8, DflHeadParts,
    ExportHead, HeadConfig, HeadKind, ObbParts, ObbV8, OutputRole, PoseParts, PoseV8,
    SegmentParts, SegmentV8, V6R1Parts, V8Parts, layer_fn,
};

const NC: usize = 2;
const CH: usize = 4;

fn convs(out_c: usize, value: f32) -> Vec<BoxedLayer> {
    (0..3)
        .map(|_| Box::new(PointwiseConv::constant(CH, out_c, value)) as BoxedLayer)
        .collect()
}

fn identities() -> Vec<BoxedLayer> {
    (0..3).map(|_| Box::new(Identity) as BoxedLayer).collect()
}

fn features() -> Vec<Array4<f32>> {
    vec![
        Array4::zeros((2, CH, 8, 8)),
        Array4::zeros((2, CH, 4, 4)),
        Array4::zeros((2, CH, 2, 2)),
    ]
}

fn branches(reg_out: usize) -> DecoupledBranches {
    DecoupledBranches {
        stems: identities(),
        cls_convs: identities(),
        reg_convs: identities(),
        cls_preds: convs(NC, 0.0),
        reg_preds: convs(reg_out, 0.0),
    }
}

fn v8_parts() -> V8Parts {
    V8Parts {
        nc: NC,
        reg_max: 16,
        stride: vec![8.0, 16.0, 32.0],
        cv2: convs(64, 0.0),
        cv3: convs(NC, 0.0),
        dfl: None,
    }
}

fn anchor_parts() -> AnchorHeadParts {
    AnchorHeadParts {
        nc: NC,
        na: 3,
        stride: vec![8.0, 16.0, 32.0],
        anchors: Array3::ones((3, 3, 2)),
        m: convs(3 * (NC + 5), 0.0),
    }
}

fn dfl_parts() -> DflHeadParts {
    DflHeadParts {
        nc: NC,
        branches: branches(4 * 17),
        use_dfl: true,
        reg_max: 16,
        proj: None,
        stride: Some(vec![8.0, 16.0, 32.0]),
    }
}

fn all_heads(config: &HeadConfig) -> Vec<Box<dyn ExportHead>> {
    let mut heads: Vec<Box<dyn ExportHead>> = Vec::new();
    heads.push(Box::new(DetectV5::new(anchor_parts()).unwrap()));
    heads.push(Box::new(DetectV7::new(anchor_parts()).unwrap()));
    heads.push(Box::new(
        DetectV6R1::new(
            V6R1Parts {
                nc: NC,
                na: 1,
                branches: branches(4),
                obj_preds: convs(1, 0.0),
            },
            config,
        )
        .unwrap(),
    ));
    heads.push(Box::new(DetectV6R3::new(dfl_parts(), config).unwrap()));
    heads.push(Box::new(
        DetectV6R4s::new(
            DflHeadParts {
                branches: branches(4),
                ..dfl_parts()
            },
            config,
        )
        .unwrap(),
    ));
    heads.push(Box::new(DetectV6R4m::new(dfl_parts(), config).unwrap()));
    heads.push(Box::new(DetectV8::new(v8_parts(), config).unwrap()));
    heads.push(Box::new(
        ObbV8::new(
            ObbParts {
                detect: v8_parts(),
                ne: 1,
                cv4: convs(1, 0.0),
            },
            config,
        )
        .unwrap(),
    ));
    heads.push(Box::new(
        PoseV8::new(
            PoseParts {
                detect: v8_parts(),
                kpt_shape: (17, 3),
                cv4: convs(51, 0.0),
            },
            config,
        )
        .unwrap(),
    ));
    heads.push(Box::new(
        SegmentV8::new(
            SegmentParts {
                detect: v8_parts(),
                nm: 32,
                npr: 64,
                proto: Box::new(PointwiseConv::constant(CH, 32, 0.0)),
                cv4: convs(32, 0.0),
            },
            config,
        )
        .unwrap(),
    ));
    heads
}

#[test]
fn test_every_head_matches_its_catalogue_layout() {
    let config = HeadConfig::default();
    let heads = all_heads(&config);
    // R2 shares the R3 parts; classify needs equally sized maps
    assert_eq!(heads.len(), HeadKind::ALL.len() - 2);

    for head in &heads {
        let out = head.forward(&features()).unwrap();
        let kind = head.kind();
        assert_eq!(out.roles(), kind.output_roles(3), "{kind}");
        assert!(out.shapes().iter().all(|s| s[0] == 2), "{kind}: batch preserved");
    }
}

#[test]
fn test_detection_levels_share_the_normalized_layout() {
    let config = HeadConfig::from_json_str(r#"{"confidence": "max_class_score"}"#).unwrap();
    let heads = all_heads(&config);

    for head in heads.iter().filter(|h| !h.kind().is_anchor_based()) {
        let out = head.forward(&features()).unwrap();
        for (role, tensor) in out.iter() {
            if let OutputRole::Detections { level } = role {
                let side = 8usize >> *level;
                assert_eq!(tensor.shape(), &[2, 5 + NC, side, side], "{}", head.kind());
                // constant zero logits give a max class score of 0.5
                assert!(
                    tensor
                        .iter()
                        .skip(4 * side * side)
                        .take(side * side)
                        .all(|v| (v - 0.5).abs() < 1e-6)
                );
            }
        }
    }
}

#[test]
fn test_v6r1_flattens_all_levels() {
    let config = HeadConfig::default();
    let head = DetectV6R1::new(
        V6R1Parts {
            nc: NC,
            na: 1,
            branches: branches(4),
            obj_preds: convs(1, 0.0),
        },
        &config,
    )
    .unwrap();

    let out = head.forward(&features()).unwrap();
    let y = out.get(OutputRole::AnchorDetections).unwrap();
    assert_eq!(y.shape(), &[2, 64 + 16 + 4, NC + 5]);
    // last anchor: level 2, cell (1, 1) at stride 32
    assert_eq!(y[&[1, 83, 0][..]], 32.0);
    assert_eq!(y[&[1, 83, 2][..]], 32.0);
}

#[test]
fn test_wrong_level_count_is_an_error() {
    let head = DetectV8::new(v8_parts(), &HeadConfig::default()).unwrap();
    let mut feats = features();
    feats.pop();
    assert!(head.forward(&feats).is_err());
}

#[test]
fn test_classify_concatenates_levels() {
    let head = ClassifyV8::new(ClassifyParts {
        conv: Box::new(layer_fn(|x| Ok(x + 1.0))),
        linear: Box::new(Linear::new(ndarray::Array2::ones((5, 2 * CH)), None).unwrap()),
        dropout: 0.2,
    });
    let feats = vec![Array4::zeros((2, CH, 3, 3)), Array4::zeros((2, CH, 3, 3))];

    let out = head.forward(&feats).unwrap();
    assert_eq!(out.roles(), HeadKind::YoloV8Classify.output_roles(2));
    let logits = out.get(OutputRole::ClassLogits).unwrap();
    assert_eq!(logits.shape(), &[2, 5]);
    assert!(logits.iter().all(|v| (v - 8.0).abs() < 1e-6));

    // maps of different sizes cannot be stacked on channels
    assert!(head.forward(&features()).is_err());
}
