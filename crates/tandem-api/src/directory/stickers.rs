use uuid::Uuid;

use tandem_types::api::StickerPackStatus;
use tandem_types::models::{StickerPack, User};

use super::Directory;
use crate::error::ApiError;

/// Packs a user can claim. Fixed at build time.
static CATALOG: [StickerPack; 3] = [
    StickerPack {
        id: "pack_fun_emojis",
        name: "Fun Emojis",
        thumbnail: "https://api.dicebear.com/7.x/fun-emoji/svg?seed=Smile",
        stickers: &[
            "https://api.dicebear.com/7.x/fun-emoji/svg?seed=Smile",
            "https://api.dicebear.com/7.x/fun-emoji/svg?seed=Sad",
            "https://api.dicebear.com/7.x/fun-emoji/svg?seed=Wink",
            "https://api.dicebear.com/7.x/fun-emoji/svg?seed=Love",
        ],
    },
    StickerPack {
        id: "pack_bottts",
        name: "Cool Bots",
        thumbnail: "https://api.dicebear.com/7.x/bottts/svg?seed=Alpha",
        stickers: &[
            "https://api.dicebear.com/7.x/bottts/svg?seed=Alpha",
            "https://api.dicebear.com/7.x/bottts/svg?seed=Beta",
            "https://api.dicebear.com/7.x/bottts/svg?seed=Gamma",
            "https://api.dicebear.com/7.x/bottts/svg?seed=Delta",
        ],
    },
    StickerPack {
        id: "pack_avatars",
        name: "Avatars",
        thumbnail: "https://api.dicebear.com/7.x/avataaars/svg?seed=Felix",
        stickers: &[
            "https://api.dicebear.com/7.x/avataaars/svg?seed=Felix",
            "https://api.dicebear.com/7.x/avataaars/svg?seed=Aneka",
            "https://api.dicebear.com/7.x/avataaars/svg?seed=Jasper",
            "https://api.dicebear.com/7.x/avataaars/svg?seed=Mimi",
        ],
    },
];

impl Directory {
    pub fn sticker_catalog(&self, user: &User) -> Vec<StickerPackStatus> {
        CATALOG
            .iter()
            .map(|pack| StickerPackStatus {
                pack: *pack,
                is_downloaded: user.downloaded_stickers.iter().any(|id| id == pack.id),
            })
            .collect()
    }

    pub fn download_sticker_pack(&self, me: Uuid, pack_id: &str) -> Result<User, ApiError> {
        if !CATALOG.iter().any(|p| p.id == pack_id) {
            return Err(ApiError::NotFound("Sticker pack not found"));
        }
        let id = me.to_string();
        self.db().add_sticker(&id, pack_id)?;
        self.require_user(&id)
    }

    /// Removing an unclaimed or unknown pack is a no-op.
    pub fn remove_sticker_pack(&self, me: Uuid, pack_id: &str) -> Result<User, ApiError> {
        let id = me.to_string();
        self.db().remove_sticker(&id, pack_id)?;
        self.require_user(&id)
    }
}
