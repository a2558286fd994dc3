//! Ordered filter registry.

use std::sync::Arc;

use super::{
    FeedbackFilter, Filter, FilterError, FilterKind, InvertFilter, PassthroughFilter,
    SpectrumFilter,
};
use crate::gpu::GpuContext;

/// Build one filter of the given kind.
pub fn create_filter(ctx: &GpuContext, kind: FilterKind) -> Result<Arc<dyn Filter>, FilterError> {
    let filter: Arc<dyn Filter> = match kind {
        FilterKind::Passthrough => Arc::new(PassthroughFilter::new(ctx)?),
        FilterKind::Invert => Arc::new(InvertFilter::new(ctx)?),
        FilterKind::Feedback => Arc::new(FeedbackFilter::new(ctx)?),
        FilterKind::Spectrum => Arc::new(SpectrumFilter::new(ctx)?),
    };
    Ok(filter)
}

/// Every built-in filter, created once at startup in [`FilterKind::all`] order.
pub struct FilterRegistry {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// Compile every kernel. Any failure aborts construction.
    pub fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        let filters = FilterKind::all()
            .iter()
            .map(|kind| create_filter(ctx, *kind))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Registered {} filters", filters.len());
        Ok(Self { filters })
    }

    pub fn all(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        let kind = FilterKind::from_str(name)?;
        self.filters.iter().find(|f| f.name() == kind.name()).cloned()
    }

    /// Filters offered to the user; the passthrough is implicit.
    pub fn selectable(&self) -> Vec<Arc<dyn Filter>> {
        self.filters
            .iter()
            .filter(|f| !f.is_passthrough())
            .cloned()
            .collect()
    }

    /// The identity filter; always first in registry order.
    pub fn passthrough(&self) -> Arc<dyn Filter> {
        self.filters[0].clone()
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_order_and_lookup() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };
        let registry = FilterRegistry::new(&ctx).unwrap();
        assert_eq!(
            registry.names(),
            vec!["passthrough", "invert", "feedback", "spectrum"]
        );
        assert!(registry.passthrough().is_passthrough());
        assert_eq!(registry.selectable().len(), 3);
        assert!(registry.get("Feedback").is_some());
        assert!(registry.get("sepia").is_none());

        let spectrum = registry.get("spectrum").unwrap();
        assert!(spectrum.wants_audio());
        assert_eq!(spectrum.author().display_name(), "Invasive Code");
    }
}
