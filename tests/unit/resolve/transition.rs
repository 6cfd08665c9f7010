use super::*;

fn fps() -> Fps {
    Fps::new(30).unwrap()
}

fn cross(secs: f64) -> Option<TransitionDef> {
    Some(TransitionDef {
        kind: TransitionKind::CrossFade,
        duration: secs,
    })
}

fn item<'a>(id: &'a str, frames: u64, t: Option<TransitionDef>, path: &'a KeyPath) -> WeaveItem<'a> {
    WeaveItem {
        id,
        frames,
        transition: t,
        path,
    }
}

#[test]
fn two_scenes_with_cross_fade_overlap() {
    let p = KeyPath::root();
    let w = weave(&[item("a", 150, cross(1.5), &p), item("b", 150, None, &p)], fps()).unwrap();
    assert_eq!(w.total_frames, 255);
    assert_eq!(fps().secs(w.total_frames), 8.5);
    assert_eq!(w.ranges[0], FrameRange::at(0, 150));
    assert_eq!(w.ranges[1], FrameRange::at(105, 150));
    assert_eq!(w.ranges[0].overlap(w.ranges[1]), 45);
    assert_eq!(w.transitions.len(), 1);
    assert_eq!(w.transitions[0].range, FrameRange::at(105, 45));
}

#[test]
fn total_is_sum_minus_transitions() {
    let p = KeyPath::root();
    let items = [
        item("a", 90, cross(1.0), &p),
        item("b", 60, None, &p),
        item("c", 120, cross(0.5), &p),
        item("d", 30, None, &p),
    ];
    let w = weave(&items, fps()).unwrap();
    assert_eq!(w.total_frames, 90 + 60 + 120 + 30 - 30 - 15);
    for pair in w.ranges.windows(2) {
        assert!(pair[0].overlap(pair[1]) <= 30);
    }
    assert_eq!(w.ranges[1].overlap(w.ranges[2]), 0);
}

#[test]
fn transition_on_last_scene_is_rejected() {
    let p = KeyPath::root().field("scenes").index(1);
    let err = weave(
        &[item("a", 30, None, &p), item("b", 30, cross(0.5), &p)],
        fps(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("last scene"));
    assert!(err.to_string().contains("$.scenes[1].transition"));
}

#[test]
fn transition_longer_than_a_neighbor_is_rejected() {
    let p = KeyPath::root();
    assert!(weave(&[item("a", 30, cross(2.0), &p), item("b", 90, None, &p)], fps()).is_err());
    assert!(weave(&[item("a", 90, cross(2.0), &p), item("b", 30, None, &p)], fps()).is_err());
    assert!(weave(&[item("a", 30, cross(1.0), &p), item("b", 30, None, &p)], fps()).is_ok());
}

#[test]
fn overlapping_transitions_inside_one_scene_are_rejected() {
    let p = KeyPath::root();
    let err = weave(
        &[
            item("a", 60, cross(1.0), &p),
            item("b", 45, cross(1.0), &p),
            item("c", 60, None, &p),
        ],
        fps(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("scene 'b'"));
}

#[test]
fn sub_frame_transition_is_rejected() {
    let p = KeyPath::root();
    assert!(weave(&[item("a", 30, cross(0.001), &p), item("b", 30, None, &p)], fps()).is_err());
}
