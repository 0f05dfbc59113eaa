//! Default bucket names for the interactive setup

use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "alpine", "arctic", "boreal", "brisk", "crisp", "drifting", "frosty", "glacial", "hushed",
    "lucid", "nordic", "pale", "polar", "quiet", "silver", "sleek", "still", "tidal", "vast",
    "wintry",
];

const NOUNS: &[&str] = &[
    "berg", "cairn", "crevasse", "drift", "fjord", "floe", "glacier", "icefall", "lagoon",
    "moraine", "narwhal", "pack", "ridge", "serac", "shelf", "sound", "summit", "tundra", "walrus",
    "zephyr",
];

/// Bucket names are global across all AWS accounts, so the suffix is wide
const SUFFIX_RANGE: std::ops::Range<u32> = 100_000..1_000_000;

/// Generate a bucket name like "iceberg-polar-floe-482913"
pub fn generate_bucket_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let number = rng.gen_range(SUFFIX_RANGE);
    format!("iceberg-{}-{}-{}", adjective, noun, number)
}
