/// HTML cleaning exposed to plugins as `Host.sanitize`
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}

/// Allow-list policy suited to user generated content: formatting, links and
/// images survive, scripts, styles and event handlers do not.
#[derive(Debug, Default, Clone, Copy)]
pub struct UgcSanitizer;

impl Sanitizer for UgcSanitizer {
    fn sanitize(&self, html: &str) -> String {
        ammonia::clean(html)
    }
}

impl<F> Sanitizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sanitize(&self, html: &str) -> String {
        self(html)
    }
}
