//! Property tests for strip arithmetic, window shape and link closure

use std::sync::Arc;

use proptest::prelude::*;
use rf_reels::{
    LinkGroups, LinkPartition, NullPresenter, Reel, ReelConfig, ReelId, ReelStrip, ReelTiming,
    SpinDirection, SymbolCache, wrap_index,
};

fn plain_reel(strip_len: usize, visible: usize, position: usize) -> Reel {
    let cache = Arc::new(SymbolCache::new());
    let names: Vec<String> = (0..strip_len).map(|i| format!("S{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let strip = Arc::new(ReelStrip::from_names("prop", &refs, &cache).unwrap());
    let config = ReelConfig::new(ReelId::column(0), visible, "prop").with_position(position);
    Reel::new(&config, ReelTiming::instant(), strip, cache, 1, &mut NullPresenter).unwrap()
}

/// Strip of whole 3-tall blocks and single cells
fn tall_reel(blocks: &[bool], position: usize) -> Reel {
    let cache = Arc::new(SymbolCache::new());
    let mut names = Vec::new();
    for (i, tall) in blocks.iter().enumerate() {
        if *tall {
            names.extend(["T-3A", "T-3B", "T-3C"].map(String::from));
        } else {
            names.push(format!("S{i}"));
        }
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let strip = Arc::new(ReelStrip::from_names("tall", &refs, &cache).unwrap());
    let config = ReelConfig::new(ReelId::column(0), 3, "tall").with_position(position);
    Reel::new(&config, ReelTiming::instant(), strip, cache, 1, &mut NullPresenter).unwrap()
}

fn direction(up: bool) -> SpinDirection {
    if up { SpinDirection::Up } else { SpinDirection::Down }
}

proptest! {
    #[test]
    fn prop_advances_wrap_around_the_strip(
        strip_len in 1usize..40,
        start in 0usize..40,
        moves in prop::collection::vec(any::<bool>(), 0..120),
    ) {
        let mut reel = plain_reel(strip_len, 3, start);
        let mut expected = (start % strip_len) as i64;
        for up in &moves {
            let dir = direction(*up);
            reel.advance(dir, &mut NullPresenter);
            expected += dir.step();
        }
        prop_assert_eq!(reel.position(), wrap_index(expected, strip_len));

        let bottom = reel.symbol_at_visible(2).unwrap();
        prop_assert_eq!(&bottom.name, &format!("S{}", reel.position()));
    }

    #[test]
    fn prop_window_length_tracks_buffers(
        ops in prop::collection::vec((0u8..3, 1usize..5, 0usize..7, 0usize..7), 1..40),
    ) {
        let mut reel = plain_reel(16, 3, 4);
        for (op, visible, top, bottom) in ops {
            match op {
                0 => reel.advance(SpinDirection::Down, &mut NullPresenter),
                1 => reel.advance(SpinDirection::Up, &mut NullPresenter),
                _ => reel.resize(visible, top, bottom, &mut NullPresenter),
            }
            prop_assert_eq!(
                reel.window_len(),
                reel.visible_count() + reel.top_buffer() + reel.bottom_buffer()
            );
            prop_assert!(reel.window().iter().all(Option::is_some));
        }
    }

    #[test]
    fn prop_contiguous_tall_symbols_need_no_repair(
        blocks in prop::collection::vec(any::<bool>(), 4..12),
        start in 0usize..36,
        advances in 0usize..60,
    ) {
        let mut reel = tall_reel(&blocks, start);
        reel.repair(&mut NullPresenter).unwrap();
        for _ in 0..advances {
            reel.advance(SpinDirection::Down, &mut NullPresenter);
        }

        let before: Vec<String> = reel
            .window()
            .iter()
            .map(|s| s.as_ref().map(|s| s.name().to_string()).unwrap_or_default())
            .collect();
        let report = reel.repair(&mut NullPresenter).unwrap();
        prop_assert_eq!(report.clobbered, 0);

        let after: Vec<String> = reel
            .window()
            .iter()
            .map(|s| s.as_ref().map(|s| s.name().to_string()).unwrap_or_default())
            .collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_link_groups_are_symmetric(
        groups in prop::collection::vec(
            (0usize..3, prop::collection::vec(0usize..10, 2..4)),
            0..8,
        ),
    ) {
        let mut links = LinkGroups::new();
        for (partition, members) in groups {
            links.add(LinkPartition::ALL[partition], members);
        }

        for a in 0..10 {
            let group = links.resolve(a);
            prop_assert!(group.contains(&a));
            for &b in &group {
                prop_assert_eq!(&links.resolve(b), &group);
            }
        }
    }
}
