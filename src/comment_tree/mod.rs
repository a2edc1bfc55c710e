use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Comment, CommentAuthor, CommentLike};

/// A comment enriched for display: author label, like totals for everyone,
/// the viewer's own like state, and direct replies nested one level deep.
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    pub id: i64,
    pub recipe_id: i64,
    pub author_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub likes_count: i64,
    pub user_liked: bool,
    pub replies: Vec<CommentNode>,
}

/// Builds the nested comment view for one recipe from flat rows.
///
/// `comments` must already be in display order (newest first); roots and the
/// replies under each root both keep that encounter order. Replies attach to
/// root comments only. A reply whose parent is missing, or is itself a reply,
/// is dropped from the result. When `viewer_id` is `None` every node has
/// `user_liked == false`.
pub fn build_comment_tree(
    comments: Vec<Comment>,
    likes: &[CommentLike],
    authors: &HashMap<i64, CommentAuthor>,
    viewer_id: Option<i64>,
) -> Vec<CommentNode> {
    let mut like_totals: HashMap<i64, i64> = HashMap::new();
    let mut viewer_likes: HashSet<i64> = HashSet::new();
    for like in likes {
        *like_totals.entry(like.comment_id).or_insert(0) += 1;
        if viewer_id == Some(like.user_id) {
            viewer_likes.insert(like.comment_id);
        }
    }

    let mut roots: Vec<CommentNode> = Vec::new();
    let mut root_index: HashMap<i64, usize> = HashMap::with_capacity(comments.len());
    let mut replies: Vec<(i64, CommentNode)> = Vec::new();

    for comment in comments {
        let author = authors.get(&comment.author_id);
        let node = CommentNode {
            id: comment.id,
            recipe_id: comment.recipe_id,
            author_id: comment.author_id,
            parent_id: comment.parent_id,
            content: comment.content,
            created_at: comment.created_at,
            author_name: author_label(author),
            author_avatar_url: author.and_then(|a| a.avatar_url.clone()),
            likes_count: like_totals.get(&comment.id).copied().unwrap_or(0),
            user_liked: viewer_likes.contains(&comment.id),
            replies: Vec::new(),
        };

        match node.parent_id {
            None => {
                root_index.insert(node.id, roots.len());
                roots.push(node);
            }
            Some(parent_id) => replies.push((parent_id, node)),
        }
    }

    for (parent_id, reply) in replies {
        if let Some(&idx) = root_index.get(&parent_id) {
            roots[idx].replies.push(reply);
        }
    }

    roots
}

/// Display name for a comment author: full name, else the part of the email
/// before '@', else "User".
fn author_label(author: Option<&CommentAuthor>) -> String {
    let Some(author) = author else {
        return "User".to_string();
    };

    if let Some(name) = author.full_name.as_deref() {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    let local_part = author.email.split('@').next().unwrap_or("");
    if !local_part.is_empty() {
        return local_part.to_string();
    }

    "User".to_string()
}
