// Form submission flow: validate, fetch, render

use tracing::info;

use crate::{
    query::{validate, SearchFields},
    render::{self, Fragment},
    upstream::ResultFetcher,
};

/// Turn one form submission into the fragment swapped into the page.
///
/// Invalid input never reaches the fetcher.
pub async fn handle_search_submission(fetcher: &dyn ResultFetcher, fields: &SearchFields) -> Fragment {
    let query = match validate(fields) {
        Ok(query) => query,
        Err(err) => {
            info!(reason = %err, "rejected search submission");
            return render::validation_error(err);
        }
    };

    let outcome = fetcher.fetch(&query).await;
    render::outcome(&outcome)
}
