use crate::{Size, Token};

/// Receives progress updates during long-running operations.
pub trait ScanProgress {
    /// Report the total number of bytes the operation will visit.
    fn report_bytes(&mut self, bytes: Size) -> anyhow::Result<()>;

    /// Report progress in whole percentage points, with results so far.
    fn report(&mut self, percentage: usize, results: u64) -> anyhow::Result<()>;
}

/// The no-op progress sink.
impl ScanProgress for () {
    fn report_bytes(&mut self, _: Size) -> anyhow::Result<()> {
        Ok(())
    }

    fn report(&mut self, _: usize, _: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<P> ScanProgress for &mut P
where
    P: ScanProgress,
{
    fn report_bytes(&mut self, bytes: Size) -> anyhow::Result<()> {
        (**self).report_bytes(bytes)
    }

    fn report(&mut self, percentage: usize, results: u64) -> anyhow::Result<()> {
        (**self).report(percentage, results)
    }
}

/// Throttles a progress sink to whole-percent changes.
///
/// A failing sink fires the cancellation token so in-flight workers wind
/// down, and the error surfaces once the operation drains.
pub(crate) struct Reporter<'a, P> {
    progress: P,
    cancel: Option<&'a Token>,
    total: u64,
    current: u64,
    percentage: usize,
    results: u64,
    last_err: Option<anyhow::Error>,
}

impl<'a, P> Reporter<'a, P>
where
    P: ScanProgress,
{
    pub(crate) fn new(progress: P, cancel: Option<&'a Token>, total: u64) -> Self {
        Self {
            progress,
            cancel,
            total,
            current: 0,
            percentage: usize::MAX,
            results: 0,
            last_err: None,
        }
    }

    /// Announce the total work.
    pub(crate) fn start(&mut self) {
        if let Err(e) = self.progress.report_bytes(Size::new(self.total)) {
            self.fail(e);
        }
    }

    /// Account for processed work and newly found results.
    pub(crate) fn tick(&mut self, processed: u64, results: u64) {
        self.current = self.current.saturating_add(processed);
        self.results += results;

        let percentage = if self.total == 0 {
            100
        } else {
            (self.current.saturating_mul(100) / self.total) as usize
        };

        if percentage != self.percentage {
            self.percentage = percentage;

            if let Err(e) = self.progress.report(percentage, self.results) {
                self.fail(e);
            }
        }
    }

    fn fail(&mut self, e: anyhow::Error) {
        if let Some(token) = self.cancel {
            token.set();
        }

        if self.last_err.is_none() {
            self.last_err = Some(e);
        }
    }

    /// Surface any sink error observed along the way.
    pub(crate) fn done(self) -> anyhow::Result<()> {
        match self.last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
