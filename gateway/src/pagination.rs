//! Paging of historical rate ranges.

use fxgate_common::HistoricalRate;

/// Number of pages needed for `total` records.
pub fn page_count(total: usize, per_page: usize) -> u32 {
    let per_page = per_page.max(1);
    let pages = total / per_page + usize::from(total % per_page != 0);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// The page actually served: out-of-range requests (including 0) fall back to page 1.
pub fn effective_page(requested: u32, page_count: u32) -> u32 {
    if requested == 0 || requested > page_count {
        1
    } else {
        requested
    }
}

/// Build one page of `full` as a new value. `full` is left untouched.
pub fn paginate(full: &HistoricalRate, requested: u32, per_page: usize) -> HistoricalRate {
    let per_page = per_page.max(1);
    let page_count = page_count(full.total_records(), per_page);
    let page = effective_page(requested, page_count);
    let skip = (page as usize - 1).saturating_mul(per_page);

    let rates = full
        .rates
        .iter()
        .skip(skip)
        .take(per_page)
        .map(|(date, day)| (*date, day.clone()))
        .collect();

    HistoricalRate {
        amount: full.amount,
        base: full.base.clone(),
        start_date: full.start_date,
        end_date: full.end_date,
        rates,
        page,
        page_count,
    }
}
