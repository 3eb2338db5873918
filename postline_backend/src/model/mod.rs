mod post;
mod post_list;
mod search;

pub use post::*;
pub use post_list::{PostList, PostSearchResults};
pub use search::{parse_search_params, split_words, SearchParams, MATCH_ALL_TERMS};
