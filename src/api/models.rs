// Copyright 2025 Duckgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::upstream::SUPPORTED_MODELS;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub object: &'static str,
    pub owned_by: &'static str,
}

/// GET /v1/models - the models the upstream currently serves
pub async fn list_models() -> Json<ModelList> {
    let data = SUPPORTED_MODELS
        .iter()
        .map(|id| ModelInfo {
            id,
            object: "model",
            owned_by: "duckduckgo",
        })
        .collect();

    Json(ModelList {
        object: "list",
        data,
    })
}
