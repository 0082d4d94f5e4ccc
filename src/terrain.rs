//! Tile-adjacency terrain builder.
//!
//! Tile names end with four numeric edge ids, `<set>_<north>_<south>_<west>_<east>`.
//! A cell accepts a tile whose north edge matches the south edge of the tile
//! above and whose west edge matches the east edge of the tile to its left.

use crate::error::{SimError, SimResult};
use crate::rng::Rng;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileSpec {
    pub name: String,
    pub north: u32,
    pub south: u32,
    pub west: u32,
    pub east: u32,
}

impl TileSpec {
    pub fn parse(name: &str) -> SimResult<Self> {
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() < 4 {
            return Err(SimError::InvalidTileName(name.to_string()));
        }
        let mut edges = [0u32; 4];
        for (slot, raw) in edges.iter_mut().zip(&parts[parts.len() - 4..]) {
            *slot = raw
                .parse()
                .map_err(|_| SimError::InvalidTileName(name.to_string()))?;
        }
        let [north, south, west, east] = edges;
        Ok(Self {
            name: name.to_string(),
            north,
            south,
            west,
            east,
        })
    }
}

/// A set where every (north, west) pair has a candidate, so generation never fails.
pub fn builtin_tile_set() -> Vec<TileSpec> {
    let mut tiles = Vec::with_capacity(16);
    for north in 0..2 {
        for south in 0..2 {
            for west in 0..2 {
                for east in 0..2 {
                    tiles.push(TileSpec {
                        name: format!("assets/tiles/meadow_{north}_{south}_{west}_{east}"),
                        north,
                        south,
                        west,
                        east,
                    });
                }
            }
        }
    }
    tiles
}

pub fn build_tile_map(
    tiles: &[TileSpec],
    width: usize,
    height: usize,
    rng: &mut Rng,
) -> SimResult<Vec<Vec<TileSpec>>> {
    let mut map: Vec<Vec<TileSpec>> = Vec::with_capacity(height);
    for row in 0..height {
        let mut line: Vec<TileSpec> = Vec::with_capacity(width);
        for col in 0..width {
            let above = row.checked_sub(1).map(|r| &map[r][col]);
            let left = line.last();
            let candidates: Vec<&TileSpec> = tiles
                .iter()
                .filter(|tile| above.map_or(true, |a| a.south == tile.north))
                .filter(|tile| left.map_or(true, |l| l.east == tile.west))
                .collect();
            if candidates.is_empty() {
                return Err(SimError::UngeneratableTerrain { row, col });
            }
            let choice = candidates[rng.pick_index(candidates.len())].clone();
            line.push(choice);
        }
        map.push(line);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trailing_edge_ids() {
        let tile = TileSpec::parse("assets/tiles/grass_path_1_0_2_3").expect("valid name");
        assert_eq!((tile.north, tile.south, tile.west, tile.east), (1, 0, 2, 3));
    }

    #[test]
    fn rejects_non_numeric_edges() {
        assert!(matches!(
            TileSpec::parse("grass_a_0_0_0"),
            Err(SimError::InvalidTileName(_))
        ));
        assert!(TileSpec::parse("grass_0_0").is_err());
    }

    #[test]
    fn generated_map_respects_adjacency() {
        let mut rng = Rng::new(11);
        let map = build_tile_map(&builtin_tile_set(), 12, 9, &mut rng).expect("builtin set");
        assert_eq!(map.len(), 9);
        for row in 0..9 {
            assert_eq!(map[row].len(), 12);
            for col in 0..12 {
                if row > 0 {
                    assert_eq!(map[row - 1][col].south, map[row][col].north);
                }
                if col > 0 {
                    assert_eq!(map[row][col - 1].east, map[row][col].west);
                }
            }
        }
    }

    #[test]
    fn incompatible_set_reports_the_failing_cell() {
        let tiles = vec![TileSpec::parse("rock_0_1_0_0").expect("tile")];
        let mut rng = Rng::new(3);
        let err = build_tile_map(&tiles, 2, 2, &mut rng).expect_err("north edge never matches");
        assert!(matches!(
            err,
            SimError::UngeneratableTerrain { row: 1, col: 0 }
        ));
    }
}
