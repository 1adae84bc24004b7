//! Scrub-bar storyboard manifest.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One tile of the sprite sheet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryboardTile {
    /// Playback time the tile represents
    pub start_time_secs: f64,
    /// Horizontal offset in the sprite
    pub x: u32,
    /// Vertical offset in the sprite
    pub y: u32,
}

/// Sprite sheet manifest: tiles stacked vertically in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Storyboard {
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles: Vec<StoryboardTile>,
}

impl Storyboard {
    /// Build the manifest for `frame_count` tiles stacked top to bottom,
    /// one every `interval_secs` of playback.
    pub fn vertical(tile_width: u32, tile_height: u32, frame_count: usize, interval_secs: f64) -> Self {
        let tiles = (0..frame_count)
            .map(|i| StoryboardTile {
                start_time_secs: i as f64 * interval_secs,
                x: 0,
                y: i as u32 * tile_height,
            })
            .collect();

        Self {
            tile_width,
            tile_height,
            tiles,
        }
    }

    /// Height of the full sprite.
    pub fn sprite_height(&self) -> u32 {
        self.tile_height * self.tiles.len() as u32
    }

    /// Tile to show for a playback position.
    pub fn tile_at(&self, time_secs: f64) -> Option<&StoryboardTile> {
        self.tiles
            .iter()
            .take_while(|t| t.start_time_secs <= time_secs)
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertical_layout() {
        let board = Storyboard::vertical(160, 90, 4, 1.0);

        assert_eq!(board.tiles.len(), 4);
        for (i, tile) in board.tiles.iter().enumerate() {
            assert_eq!(tile.x, 0);
            assert_eq!(tile.y, i as u32 * 90);
            assert_eq!(tile.start_time_secs, i as f64);
        }
        assert_eq!(board.sprite_height(), 360);
    }

    #[test]
    fn test_tile_at() {
        let board = Storyboard::vertical(160, 90, 3, 2.0);

        assert_eq!(board.tile_at(0.0).unwrap().y, 0);
        assert_eq!(board.tile_at(3.9).unwrap().y, 90);
        assert_eq!(board.tile_at(100.0).unwrap().y, 180);
        assert!(board.tile_at(-1.0).is_none());
    }
}
