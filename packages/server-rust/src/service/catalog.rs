//! Static title catalog served by `top10` and streamed by `search`.

use reel_core::{SearchHit, TitleGraph};

/// Read-only catalog shared by every service instance.
///
/// The graph is built once at startup; `top10` hands out clones so callers
/// can never mutate the shared copy.
#[derive(Debug, Clone)]
pub struct Catalog {
    top10: TitleGraph,
}

impl Catalog {
    /// Builds the built-in catalog: seven movies and three series.
    #[must_use]
    pub fn builtin() -> Self {
        let mut graph = TitleGraph::new();

        graph.add_movie("The Long Night Shift", 2019, 112);
        graph.add_serie(
            "Harbour Lights",
            [
                (1, 1, "Arrival"),
                (1, 2, "Low Tide"),
                (1, 3, "The Lighthouse Keeper"),
                (2, 1, "Return"),
            ],
        );
        graph.add_movie("Paper Satellites", 2021, 98);
        graph.add_movie("A Quiet Inventory", 2017, 124);
        graph.add_serie(
            "Northbound",
            [(1, 1, "Departure"), (1, 2, "Crossing"), (1, 3, "Border")],
        );
        graph.add_movie("Glass Orchard", 2022, 105);
        graph.add_movie("Counting Backwards", 2015, 91);
        graph.add_serie("The Archivists", [(1, 1, "Pilot"), (1, 2, "Misfiled")]);
        graph.add_movie("Second Draft", 2020, 117);
        graph.add_movie("Weathervane", 2023, 101);

        Self { top10: graph }
    }

    /// The ten most watched titles.
    #[must_use]
    pub fn top10(&self) -> TitleGraph {
        self.top10.clone()
    }

    /// Results pushed by `search`, ranked in catalog order.
    #[must_use]
    pub fn search_hits(&self) -> Vec<SearchHit> {
        self.top10
            .titles()
            .iter()
            .zip(1u32..)
            .map(|(title, rank)| SearchHit {
                rank,
                title_id: title.id(),
                name: title.name().to_owned(),
                kind: title.kind(),
            })
            .collect()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use reel_core::TitleKind;

    use super::*;

    #[test]
    fn top10_has_ten_titles_of_both_kinds() {
        let graph = Catalog::builtin().top10();
        assert_eq!(graph.len(), 10);
        assert!(graph.movies().count() >= 1);
        assert!(graph.series().any(|s| !s.episodes.is_empty()));
        graph.verify().unwrap();
    }

    #[test]
    fn search_hits_cover_the_catalog() {
        let catalog = Catalog::builtin();
        let hits = catalog.search_hits();
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[9].rank, 10);
        assert!(hits.iter().any(|h| h.kind == TitleKind::Serie));
    }
}
