/// Provides the recommended log filter for programs embedding phasekeeper.
///
/// The guiding principle for this filtering is that at [`log::Level::Debug`] or lower level,
/// there should be no messages produced for every single captured mutation unless something
/// is wrong. Per-capture and per-phase tracing is emitted at [`log::Level::Trace`] from the
/// capture and tracker modules; embedders who want it should not use this filter.
pub fn standard_filter(metadata: &log::Metadata<'_>) -> bool {
    let target = metadata.target();
    let noisy = target.starts_with("phasekeeper::capture")
        || target.starts_with("phasekeeper::tracker");

    !(noisy && metadata.level() >= log::Level::Trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter() {
        assert!(!standard_filter(
            &log::Metadata::builder()
                .target("phasekeeper::tracker")
                .level(log::Level::Trace)
                .build()
        ));
        assert!(standard_filter(
            &log::Metadata::builder()
                .target("phasekeeper::tracker")
                .level(log::Level::Warn)
                .build()
        ));
        assert!(standard_filter(
            &log::Metadata::builder()
                .target("phasekeeper::transfer")
                .level(log::Level::Trace)
                .build()
        ));
        assert!(standard_filter(
            &log::Metadata::builder().target("some_random_crate").build()
        ));
    }
}
