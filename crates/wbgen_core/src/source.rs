use std::collections::VecDeque;

use anyhow::Result;
use tracing::debug;

use crate::entity::item_id_from_title;
use crate::mediawiki::RepositoryApi;

/// Lazily pages through `list=allpages` and yields item ids.
pub struct AllPagesStream<A: RepositoryApi> {
    api: A,
    namespace: i32,
    buffered: VecDeque<String>,
    continuation: Option<String>,
    exhausted: bool,
}

impl<A: RepositoryApi> AllPagesStream<A> {
    pub fn new(api: A, namespace: i32) -> Self {
        Self {
            api,
            namespace,
            buffered: VecDeque::new(),
            continuation: None,
            exhausted: false,
        }
    }

    fn fetch_next_page(&mut self) -> Result<()> {
        let listing = self
            .api
            .list_pages(self.namespace, self.continuation.as_deref())?;
        debug!(
            namespace = self.namespace,
            titles = listing.titles.len(),
            more = listing.continuation.is_some(),
            "fetched page listing"
        );
        self.buffered
            .extend(listing.titles.iter().filter_map(|title| item_id_from_title(title)));
        self.exhausted = listing.continuation.is_none();
        self.continuation = listing.continuation;
        Ok(())
    }
}

impl<A: RepositoryApi> Iterator for AllPagesStream<A> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.buffered.pop_front() {
                return Some(Ok(id));
            }
            if self.exhausted {
                return None;
            }
            if let Err(error) = self.fetch_next_page() {
                self.exhausted = true;
                return Some(Err(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::{Result, bail};

    use super::*;
    use crate::entity::EntityLookup;
    use crate::mediawiki::PageListing;

    struct PagedApi {
        pages: Vec<Vec<&'static str>>,
        requests: Vec<Option<String>>,
        fail_at: Option<usize>,
    }

    impl RepositoryApi for PagedApi {
        fn get_entity(&mut self, _id: &str, _language: &str) -> Result<EntityLookup> {
            Ok(EntityLookup::Missing)
        }

        fn get_labels(
            &mut self,
            _ids: &[String],
            _language: &str,
        ) -> Result<BTreeMap<String, Option<String>>> {
            Ok(BTreeMap::new())
        }

        fn list_pages(&mut self, namespace: i32, continuation: Option<&str>) -> Result<PageListing> {
            assert_eq!(namespace, 120);
            let index = self.requests.len();
            self.requests.push(continuation.map(ToString::to_string));
            if self.fail_at == Some(index) {
                bail!("listing unavailable");
            }
            let titles = self.pages[index].iter().map(ToString::to_string).collect();
            let next = index + 1;
            Ok(PageListing {
                titles,
                continuation: (next < self.pages.len()).then(|| format!("page{next}")),
            })
        }
    }

    #[test]
    fn stream_follows_continuation_and_filters_titles() {
        let api = PagedApi {
            pages: vec![
                vec!["Item:Q1", "Item:Q2", "Item:Sandbox"],
                vec![],
                vec!["Item:Q10"],
            ],
            requests: Vec::new(),
            fail_at: None,
        };
        let mut stream = AllPagesStream::new(api, 120);
        let ids = stream
            .by_ref()
            .collect::<Result<Vec<_>>>()
            .expect("stream");
        assert_eq!(ids, vec!["Q1", "Q2", "Q10"]);
        assert_eq!(
            stream.api.requests,
            vec![None, Some("page1".to_string()), Some("page2".to_string())]
        );
    }

    #[test]
    fn stream_is_lazy() {
        let api = PagedApi {
            pages: vec![vec!["Q1", "Q2"], vec!["Q3"]],
            requests: Vec::new(),
            fail_at: None,
        };
        let mut stream = AllPagesStream::new(api, 120);
        assert_eq!(stream.next().and_then(Result::ok).as_deref(), Some("Q1"));
        assert_eq!(stream.api.requests.len(), 1);
    }

    #[test]
    fn listing_error_is_yielded_once() {
        let api = PagedApi {
            pages: vec![vec!["Q1"], vec!["Q2"]],
            requests: Vec::new(),
            fail_at: Some(1),
        };
        let mut stream = AllPagesStream::new(api, 120);
        assert!(matches!(stream.next(), Some(Ok(_))));
        assert!(matches!(stream.next(), Some(Err(_))));
        assert!(stream.next().is_none());
    }
}
