//! Output documents. Both renderers work in memory; writing is the caller's job.

pub mod html;
pub mod rss;

pub use html::render_html;
pub use rss::render_rss;
