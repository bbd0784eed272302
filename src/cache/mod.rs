pub mod audio;
pub mod story;
pub mod word;

pub use audio::{AudioCache, AudioCacheEntry, AudioCacheStats, TtsCache};
pub use story::{CacheIndexEntry, Spread, Story, StoryCache, StoryStatus};
pub use word::{SentenceType, WordCacheKey, WordPosition, WordTtsCache};
