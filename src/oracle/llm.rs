use super::{OracleError, OracleResult};
use crate::types::Movie;
use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use std::time::{Duration, Instant};

/// Generates in-character answers and hints about the secret movie through an
/// OpenAI-compatible chat endpoint.
pub struct LlmAnswerer {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmAnswerer {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        let client = Client::with_config(config);

        Self {
            client,
            model,
            timeout,
            max_tokens,
        }
    }

    /// Answer a player question truthfully but evasively. Difficulty ramps
    /// down as the question number climbs toward the budget.
    pub async fn answer_question(
        &self,
        movie: &Movie,
        question: &str,
        question_number: usize,
    ) -> OracleResult<String> {
        let prompt = format!(
            "You are playing a movie guessing game. You know the movie but the players are trying to guess it.\n\n\
            **THE MOVIE IS: \"{title}\" ({year})**\n\n\
            **Movie Details:**\n\
            - Genres: {genres}\n\
            - Release Year: {year}\n\
            - Director: {director}\n\
            - Main Cast (in order): {main_cast}\n\
            - Full Cast: {full_cast}\n\
            - Plot: {overview}\n\
            - Runtime: {runtime} minutes\n\
            - Rating: {rating}/10\n\
            - Keywords: {keywords}\n\
            - Budget: ${budget}\n\
            - Revenue: ${revenue}\n\n\
            **IMPORTANT RULES:**\n\
            1. Answer the question TRUTHFULLY but MAKE IT TRICKY\n\
            2. Give misleading but technically correct answers\n\
            3. If asked about actors, mention supporting actors instead of leads\n\
            4. If asked about genre, mention secondary genres if multiple exist\n\
            5. Be vague when possible (e.g., \"a big city\" instead of \"New York\")\n\
            6. This is question {number} of 15, so adjust difficulty:\n\
            - Questions 1-5: Be very tricky and vague\n\
            - Questions 6-10: Be moderately helpful\n\
            - Questions 11-15: Be more direct (they're running out of questions)\n\
            7. Keep answers short (1-2 sentences max)\n\
            8. Never reveal the movie title directly\n\
            9. Make the players work for it!\n\n\
            **The players are asking: \"{question}\"**\n\n\
            Give a tricky but truthful answer:",
            title = movie.title,
            year = movie.release_year,
            genres = movie.genres.join(", "),
            director = movie.director().unwrap_or("Unknown"),
            main_cast = movie
                .cast
                .iter()
                .take(5)
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            full_cast = movie
                .cast
                .iter()
                .map(|c| format!("{} (as {})", c.name, c.character))
                .collect::<Vec<_>>()
                .join(", "),
            overview = movie.overview,
            runtime = movie.runtime.unwrap_or(0),
            rating = movie.rating,
            keywords = movie.keywords.join(", "),
            budget = movie.budget,
            revenue = movie.revenue,
            number = question_number,
            question = question,
        );

        let answer = self.generate(&prompt).await?;
        tracing::debug!("Q{}: {} -> {}", question_number, question, answer);
        Ok(answer)
    }

    /// Produce a hint that narrows things down without giving the title away
    pub async fn hint(&self, movie: &Movie, questions_asked: usize) -> OracleResult<String> {
        let prompt = format!(
            "You are playing a movie guessing game. The movie is \"{title}\" ({year}).\n\n\
            **Movie Details:**\n\
            - Genres: {genres}\n\
            - Release Year: {year}\n\
            - Director: {director}\n\
            - Main Cast: {main_cast}\n\
            - Plot: {overview}\n\n\
            **IMPORTANT RULES:**\n\
            1. Provide a helpful hint that narrows down the possibilities\n\
            2. Don't reveal the movie title directly\n\
            3. Focus on unique aspects of the movie\n\
            4. Be specific but not too obvious\n\
            5. Keep it short (1-2 sentences)\n\n\
            The players have asked {asked} questions so far and are requesting a hint. \
            Give them a useful clue:",
            title = movie.title,
            year = movie.release_year,
            genres = movie.genres.join(", "),
            director = movie.director().unwrap_or("Unknown"),
            main_cast = movie
                .cast
                .iter()
                .take(5)
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            overview = movie.overview,
            asked = questions_asked,
        );

        self.generate(&prompt).await
    }

    async fn generate(&self, prompt: &str) -> OracleResult<String> {
        let start = Instant::now();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(self.max_tokens)
            .temperature(1.0)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| OracleError::ApiError(e.to_string()))?
                .into()])
            .build()
            .map_err(|e| OracleError::ApiError(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))?
            .map_err(|e| OracleError::ApiError(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| OracleError::ParseError("No content in response".to_string()))?;

        tracing::debug!(
            "Generated {} chars with {} in {}ms",
            text.len(),
            self.model,
            start.elapsed().as_millis()
        );

        Ok(text.trim().to_string())
    }
}
