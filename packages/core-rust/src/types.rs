//! Catalog graph: titles, series and their episodes.
//!
//! A `Serie` owns an ordered list of episodes and every `Episode` points back
//! at the serie it belongs to. The back-reference is relational, not owning:
//! episodes live in an arena inside [`TitleGraph`] and are addressed by
//! [`EpisodeId`], while each episode stores the [`TitleId`] of its serie. The
//! graph therefore serializes as a plain tree and the back-references survive
//! a round trip through any serde format.

use serde::{Deserialize, Serialize};

/// Identifier of a title within a [`TitleGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TitleId(pub u32);

/// Index of an episode in the [`TitleGraph`] episode arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub u32);

/// A feature film.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: TitleId,
    pub name: String,
    pub year: u16,
    pub duration_minutes: u16,
}

/// A serie with an ordered sequence of episodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Serie {
    pub id: TitleId,
    pub name: String,
    /// Episodes in broadcast order, as indices into the episode arena.
    pub episodes: Vec<EpisodeId>,
}

/// A single episode. `serie` is the back-reference to the owning [`Serie`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: EpisodeId,
    pub serie: TitleId,
    pub season: u16,
    pub number: u16,
    pub name: String,
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Title {
    #[serde(rename = "MOVIE")]
    Movie(Movie),
    #[serde(rename = "SERIE")]
    Serie(Serie),
}

impl Title {
    #[must_use]
    pub fn id(&self) -> TitleId {
        match self {
            Self::Movie(m) => m.id,
            Self::Serie(s) => s.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Movie(m) => &m.name,
            Self::Serie(s) => &s.name,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TitleKind {
        match self {
            Self::Movie(_) => TitleKind::Movie,
            Self::Serie(_) => TitleKind::Serie,
        }
    }

    #[must_use]
    pub fn as_serie(&self) -> Option<&Serie> {
        match self {
            Self::Serie(s) => Some(s),
            Self::Movie(_) => None,
        }
    }
}

/// Discriminant for [`Title`] variants, used where only the kind travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TitleKind {
    #[serde(rename = "MOVIE")]
    Movie,
    #[serde(rename = "SERIE")]
    Serie,
}

/// Integrity violations detected by [`TitleGraph::verify`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate title id {0:?}")]
    DuplicateTitle(TitleId),
    #[error("serie {serie:?} lists unknown episode {episode:?}")]
    DanglingEpisode { serie: TitleId, episode: EpisodeId },
    #[error("episode {episode:?} points at {found:?} but is listed by serie {expected:?}")]
    BrokenBackReference {
        episode: EpisodeId,
        expected: TitleId,
        found: TitleId,
    },
    #[error("episode {0:?} is not listed by any serie")]
    OrphanEpisode(EpisodeId),
    #[error("episode at arena slot {slot} carries id {id:?}")]
    MisplacedEpisode { slot: usize, id: EpisodeId },
}

/// An ordered list of titles plus the episode arena the series index into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleGraph {
    titles: Vec<Title>,
    episodes: Vec<Episode>,
}

impl TitleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_title_id(&self) -> TitleId {
        let next = self.titles.iter().map(|t| t.id().0 + 1).max().unwrap_or(1);
        TitleId(next)
    }

    /// Appends a movie and returns its id.
    pub fn add_movie(&mut self, name: impl Into<String>, year: u16, duration_minutes: u16) -> TitleId {
        let id = self.next_title_id();
        self.titles.push(Title::Movie(Movie {
            id,
            name: name.into(),
            year,
            duration_minutes,
        }));
        id
    }

    /// Appends a serie whose episodes are given as `(season, number, name)`
    /// in broadcast order. Each episode is allocated in the arena with its
    /// back-reference set to the new serie.
    pub fn add_serie<I, S>(&mut self, name: impl Into<String>, episodes: I) -> TitleId
    where
        I: IntoIterator<Item = (u16, u16, S)>,
        S: Into<String>,
    {
        let id = self.next_title_id();
        let mut ids = Vec::new();
        for (season, number, episode_name) in episodes {
            #[allow(clippy::cast_possible_truncation)]
            let episode_id = EpisodeId(self.episodes.len() as u32);
            self.episodes.push(Episode {
                id: episode_id,
                serie: id,
                season,
                number,
                name: episode_name.into(),
            });
            ids.push(episode_id);
        }
        self.titles.push(Title::Serie(Serie {
            id,
            name: name.into(),
            episodes: ids,
        }));
        id
    }

    #[must_use]
    pub fn titles(&self) -> &[Title] {
        &self.titles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    #[must_use]
    pub fn title(&self, id: TitleId) -> Option<&Title> {
        self.titles.iter().find(|t| t.id() == id)
    }

    #[must_use]
    pub fn episode(&self, id: EpisodeId) -> Option<&Episode> {
        self.episodes.get(id.0 as usize)
    }

    pub fn movies(&self) -> impl Iterator<Item = &Movie> {
        self.titles.iter().filter_map(|t| match t {
            Title::Movie(m) => Some(m),
            Title::Serie(_) => None,
        })
    }

    pub fn series(&self) -> impl Iterator<Item = &Serie> {
        self.titles.iter().filter_map(Title::as_serie)
    }

    /// Episodes of `serie` in order. Indices that do not resolve are skipped;
    /// use [`verify`](Self::verify) to detect them.
    pub fn episodes_of<'a>(&'a self, serie: &'a Serie) -> impl Iterator<Item = &'a Episode> + 'a {
        serie.episodes.iter().filter_map(|id| self.episode(*id))
    }

    /// Follows an episode's back-reference to its serie.
    #[must_use]
    pub fn serie_of(&self, episode: &Episode) -> Option<&Serie> {
        self.title(episode.serie).and_then(Title::as_serie)
    }

    /// Checks graph integrity.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] found: duplicate title ids, episode
    /// indices that do not resolve, back-references that do not name the
    /// listing serie, or arena episodes no serie lists.
    pub fn verify(&self) -> Result<(), GraphError> {
        let mut seen = std::collections::HashSet::new();
        for title in &self.titles {
            if !seen.insert(title.id()) {
                return Err(GraphError::DuplicateTitle(title.id()));
            }
        }

        for (slot, episode) in self.episodes.iter().enumerate() {
            if episode.id.0 as usize != slot {
                return Err(GraphError::MisplacedEpisode { slot, id: episode.id });
            }
        }

        let mut listed = vec![false; self.episodes.len()];
        for serie in self.series() {
            for &episode_id in &serie.episodes {
                let Some(episode) = self.episode(episode_id) else {
                    return Err(GraphError::DanglingEpisode {
                        serie: serie.id,
                        episode: episode_id,
                    });
                };
                if episode.serie != serie.id {
                    return Err(GraphError::BrokenBackReference {
                        episode: episode_id,
                        expected: serie.id,
                        found: episode.serie,
                    });
                }
                listed[episode_id.0 as usize] = true;
            }
        }

        if let Some(slot) = listed.iter().position(|l| !l) {
            #[allow(clippy::cast_possible_truncation)]
            return Err(GraphError::OrphanEpisode(EpisodeId(slot as u32)));
        }
        Ok(())
    }
}

/// One result streamed over the duplex callback channel by `search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// 1-based position in the result sequence.
    pub rank: u32,
    pub title_id: TitleId,
    pub name: String,
    pub kind: TitleKind,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> TitleGraph {
        let mut graph = TitleGraph::new();
        graph.add_movie("The Matrix", 1999, 136);
        graph.add_serie(
            "Breaking Bad",
            [(1, 1, "Pilot"), (1, 2, "Cat's in the Bag..."), (1, 3, "...And the Bag's in the River")],
        );
        graph
    }

    #[test]
    fn ids_are_assigned_in_order() {
        let graph = sample();
        let ids: Vec<_> = graph.titles().iter().map(Title::id).collect();
        assert_eq!(ids, vec![TitleId(1), TitleId(2)]);
    }

    #[test]
    fn episodes_point_back_at_their_serie() {
        let graph = sample();
        let serie = graph.series().next().unwrap();
        let episodes: Vec<_> = graph.episodes_of(serie).collect();
        assert_eq!(episodes.len(), 3);
        for episode in episodes {
            assert_eq!(graph.serie_of(episode), Some(serie));
        }
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn verify_detects_broken_back_reference() {
        let mut graph = sample();
        graph.episodes[1].serie = TitleId(1);
        assert_eq!(
            graph.verify(),
            Err(GraphError::BrokenBackReference {
                episode: EpisodeId(1),
                expected: TitleId(2),
                found: TitleId(1),
            })
        );
    }

    #[test]
    fn verify_detects_dangling_and_orphan_episodes() {
        let mut graph = sample();
        if let Title::Serie(s) = &mut graph.titles[1] {
            s.episodes.push(EpisodeId(42));
        }
        assert!(matches!(graph.verify(), Err(GraphError::DanglingEpisode { .. })));

        let mut graph = sample();
        if let Title::Serie(s) = &mut graph.titles[1] {
            s.episodes.pop();
        }
        assert_eq!(graph.verify(), Err(GraphError::OrphanEpisode(EpisodeId(2))));
    }

    #[test]
    fn msgpack_round_trip_keeps_back_references() {
        let graph = sample();
        let bytes = rmp_serde::to_vec_named(&graph).expect("serialize");
        let decoded: TitleGraph = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, graph);

        let serie = decoded.series().next().unwrap();
        let first = decoded.episodes_of(serie).next().unwrap();
        assert_eq!(decoded.serie_of(first).map(|s| s.id), Some(serie.id));
    }

    #[test]
    fn json_uses_kind_discriminator() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["titles"][0]["kind"], "MOVIE");
        assert_eq!(json["titles"][1]["kind"], "SERIE");
        assert_eq!(json["episodes"][0]["serie"], 2);
    }

    proptest! {
        #[test]
        fn generated_graphs_survive_serialization(
            movies in 0usize..5,
            series in proptest::collection::vec(1u16..8, 0..5),
        ) {
            let mut graph = TitleGraph::new();
            for i in 0..movies {
                graph.add_movie(format!("movie {i}"), 2000, 90);
            }
            for (i, count) in series.iter().enumerate() {
                graph.add_serie(
                    format!("serie {i}"),
                    (1..=*count).map(|n| (1u16, n, format!("episode {n}"))),
                );
            }

            let bytes = rmp_serde::to_vec_named(&graph).unwrap();
            let decoded: TitleGraph = rmp_serde::from_slice(&bytes).unwrap();
            prop_assert!(decoded.verify().is_ok());
            for serie in decoded.series() {
                for episode in decoded.episodes_of(serie) {
                    prop_assert_eq!(episode.serie, serie.id);
                }
            }
        }
    }
}
