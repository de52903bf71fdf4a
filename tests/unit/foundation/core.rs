use super::*;

use std::collections::HashMap;

#[test]
fn negative_zero_time_keys_like_zero() {
    assert_eq!(TimeValue(0.0), TimeValue(-0.0));
    let mut map: HashMap<TimeValue, u32> = HashMap::new();
    map.insert(TimeValue(-0.0), 1);
    assert_eq!(map.get(&TimeValue(0.0)), Some(&1));
}

#[test]
fn fractional_times_are_distinct_keys() {
    assert_ne!(TimeValue(1.0), TimeValue(1.5));
    assert_eq!(TimeValue(1.5).round_nearest(), 2);
    assert_eq!(TimeValue(-0.4).round_nearest(), 0);
}

#[test]
fn plane_desc_rejects_bad_component_counts() {
    assert!(PlaneDesc::new("depth", 0).is_err());
    assert!(PlaneDesc::new("depth", 5).is_err());
    assert_eq!(PlaneDesc::new("motion", 2).unwrap().num_comps, 2);
    assert_eq!(PlaneDesc::rgba().num_comps, 4);
    assert_eq!(PlaneDesc::alpha().num_comps, 1);
}

#[test]
fn rect_dimensions_and_emptiness() {
    let r = RectI::new(-2, -3, 4, 5);
    assert_eq!(r.width(), 6);
    assert_eq!(r.height(), 8);
    assert!(!r.is_empty());
    assert!(RectI::new(3, 0, 3, 10).is_empty());
    assert!(RectI::new(0, 5, 10, 2).is_empty());
    assert!(RectI::default().is_empty());
}

#[test]
fn union_ignores_empty_operands() {
    let a = RectI::new(0, 0, 4, 4);
    let empty = RectI::default();
    assert_eq!(a.union(empty), a);
    assert_eq!(empty.union(a), a);
    assert_eq!(a.union(RectI::new(2, -2, 6, 3)), RectI::new(0, -2, 6, 4));
}

#[test]
fn intersect_clamps_to_overlap() {
    let a = RectI::new(0, 0, 10, 10);
    assert_eq!(a.intersect(RectI::new(5, 5, 20, 20)), RectI::new(5, 5, 10, 10));
    assert_eq!(a.intersect(RectI::new(20, 20, 30, 30)), RectI::default());
}

#[test]
fn contains_treats_empty_as_always_inside() {
    let a = RectI::new(0, 0, 10, 10);
    assert!(a.contains(RectI::new(2, 2, 8, 8)));
    assert!(a.contains(RectI::default()));
    assert!(!a.contains(RectI::new(-1, 0, 5, 5)));
}

#[test]
fn zeroed_plane_allocates_expected_length() {
    let img = ImagePlane::new_zeroed(PlaneDesc::rgba(), RectI::new(0, 0, 3, 2));
    assert_eq!(img.pixels.len(), 3 * 2 * 4);
    assert_eq!(img.pixels.len(), img.expected_len());
    let alpha = ImagePlane::new_zeroed(PlaneDesc::alpha(), RectI::new(-1, -1, 1, 1));
    assert_eq!(alpha.pixels.len(), 4);
}

#[test]
fn cancel_token_is_sticky_and_shared() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());
    token.cancel();
    assert!(clone.is_cancelled());
    token.cancel();
    assert!(token.is_cancelled());
}
