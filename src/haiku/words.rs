/// The fixed haiku dictionary
///
/// Order is part of the encoding: a symbol decodes to a different value if a
/// word moves. Append-only would also break round-trips with previously
/// printed symbols, so the list is frozen.

pub(crate) const WORDS: [&str; 128] = [
    "autumn", "hidden", "bitter", "misty", "silent", "empty", "dry", "dark",
    "summer", "icy", "delicate", "quiet", "white", "cool", "spring", "winter",
    "patient", "twilight", "crimson", "wispy", "weathered", "blue", "billowing", "broken",
    "cold", "damp", "falling", "frosty", "green", "long", "late", "lingering",
    "bold", "little", "muddy", "old", "red", "rough", "still", "small",
    "sparkling", "shy", "wandering", "withered", "wild", "black", "young", "holy",
    "solitary", "fragrant", "aged", "snowy", "proud", "floral", "restless", "divine",
    "polished", "ancient", "purple", "lively", "nameless", "lucky", "odd", "calm",
    "waterfall", "river", "breeze", "moon", "rain", "wind", "sea", "morning",
    "snow", "lake", "sunset", "pine", "shadow", "leaf", "dawn", "glitter",
    "forest", "hill", "cloud", "meadow", "sun", "glade", "bird", "brook",
    "butterfly", "bush", "dew", "dust", "field", "fire", "flower", "firefly",
    "feather", "grass", "haze", "mountain", "night", "pond", "darkness", "snowflake",
    "silence", "sound", "sky", "shape", "surf", "thunder", "violet", "water",
    "wildflower", "wave", "resonance", "smoke", "star", "frog", "frost", "voice",
    "paper", "dream", "cherry", "tree", "fog", "stone", "sand", "ember",
];
