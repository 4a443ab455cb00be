//! Custom tracing layers

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{RootContextData, RootContextGuard};

/// Layer that attaches the active root context to new spans
#[derive(Debug, Default)]
pub struct RootContextLayer;

impl RootContextLayer {
    /// Create a new root context layer
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct RootContextExtension {
    pub data: RootContextData,
}

impl<S> Layer<S> for RootContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(root_ctx) = RootContextGuard::current()
        {
            span.extensions_mut()
                .insert(RootContextExtension { data: root_ctx });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use ledgerfs_core::RootId;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::registry::Registry;
    use uuid::Uuid;

    // Records the root attached to each new span.
    struct Probe(Arc<Mutex<Vec<Option<String>>>>);

    impl<S> Layer<S> for Probe
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
            let root = ctx.span(id).and_then(|span| {
                span.extensions()
                    .get::<RootContextExtension>()
                    .map(|ext| ext.data.root.clone())
            });
            self.0.lock().unwrap().push(root);
        }
    }

    #[test]
    fn test_spans_carry_root() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default()
            .with(RootContextLayer::new())
            .with(Probe(seen.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let _outside = tracing::info_span!("outside");
            let root = RootId::new("ledger", "vol", "mnt");
            let _guard = RootContextGuard::new(&root, Uuid::new_v4());
            let _inside = tracing::info_span!("inside");
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![None, Some("ledger/vol/mnt".to_string())]
        );
    }
}
