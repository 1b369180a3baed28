use super::{matching, AppState};
use crate::error::{GameError, GameResult};
use crate::protocol::{GameOverReason, ServerMessage, VoteProposal};
use crate::types::*;
use chrono::Utc;
use std::collections::HashMap;

/// Outcome of recording one ballot
#[derive(Debug)]
pub struct BallotUpdate {
    pub vote: Vote,
    pub votes_count: usize,
    pub total_players: usize,
    /// True exactly when every connected player has a recorded ballot; the
    /// vote slot has been moved to `Resolving` and the caller must drive
    /// `resolve_active_vote`.
    pub quorum_reached: bool,
}

/// What a completed resolution changed, for the result broadcasts
struct Resolution {
    entry: HistoryEntry,
    approved: bool,
    is_correct_guess: bool,
    winner: Option<Player>,
    questions_count: usize,
    questions_used: u32,
    budget_exhausted: bool,
}

impl AppState {
    /// Open a vote on a proposal. Fails while another vote occupies the slot.
    /// The proposer's own ballot is pre-filled "yes".
    pub async fn start_vote(
        &self,
        code: &str,
        player_id: &str,
        proposal: VoteProposal,
    ) -> GameResult<Vote> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        if !room.active_vote.is_idle() {
            return Err(GameError::VoteAlreadyActive);
        }

        let player = room
            .player(player_id)
            .ok_or_else(|| GameError::InvalidMessage("Player not in room".to_string()))?;

        let kind = proposal.kind();
        let (prompt, guess) = match proposal {
            VoteProposal::Question { text } => (text, None),
            VoteProposal::Hint => ("hint".to_string(), None),
            VoteProposal::GiveUp => ("give_up".to_string(), None),
            VoteProposal::Guess { text } => ("guess".to_string(), Some(text)),
        };

        let vote = Vote {
            kind,
            prompt,
            guess,
            proposed_by: player.id.clone(),
            proposed_by_name: player.name.clone(),
            ballots: HashMap::from([(player.id.clone(), Ballot::Yes)]),
            started_at: Utc::now(),
        };

        room.active_vote = VoteState::Pending(vote.clone());
        tracing::info!("Vote started in room {}: {:?}", code, kind);
        Ok(vote)
    }

    /// Record a ballot. Re-votes overwrite (last value wins). Ballots with no
    /// pending vote — none open, or one already resolving — are silently
    /// ignored, mirroring a vote that concluded before the message landed.
    pub async fn cast_ballot(
        &self,
        code: &str,
        player_id: &str,
        ballot: Ballot,
    ) -> GameResult<Option<BallotUpdate>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;
        let total_players = room.connected_count();

        match std::mem::take(&mut room.active_vote) {
            VoteState::Pending(mut vote) => {
                vote.ballots.insert(player_id.to_string(), ballot);
                let votes_count = vote.ballots.len();
                let quorum_reached = votes_count == total_players;

                room.active_vote = if quorum_reached {
                    // Claim resolution while still under the lock; late
                    // ballots now fall into the ignore arm below.
                    VoteState::Resolving(vote.clone())
                } else {
                    VoteState::Pending(vote.clone())
                };

                tracing::info!(
                    "Ballot in room {}: {} ({}/{})",
                    code,
                    player_id,
                    votes_count,
                    total_players
                );

                Ok(Some(BallotUpdate {
                    vote,
                    votes_count,
                    total_players,
                    quorum_reached,
                }))
            }
            other => {
                room.active_vote = other;
                Ok(None)
            }
        }
    }

    /// Cancel the pending vote. Only the proposer may cancel, and only before
    /// quorum — a resolving vote runs to completion.
    /// Returns whether there was anything to cancel.
    pub async fn cancel_vote(&self, code: &str, player_id: &str) -> GameResult<bool> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        match &room.active_vote {
            VoteState::Idle => Ok(false),
            VoteState::Resolving(_) => Err(GameError::InvalidMessage(
                "Vote is already being resolved".to_string(),
            )),
            VoteState::Pending(vote) => {
                if vote.proposed_by != player_id {
                    return Err(GameError::NotProposer);
                }
                room.active_vote = VoteState::Idle;
                tracing::info!("Vote cancelled in room {} by {}", code, player_id);
                Ok(true)
            }
        }
    }

    /// Drive a vote that reached quorum through resolution: tally, consult
    /// the oracle for approved votes, append the history entry, clear the
    /// slot, and broadcast the results. The slot stays `Resolving` across the
    /// oracle call so no other vote can start meanwhile.
    pub async fn resolve_active_vote(&self, code: &str) {
        // Snapshot what resolution needs, then release the lock for the
        // oracle call.
        let (vote, movie, history_len) = {
            let rooms = self.rooms.read().await;
            let Some(room) = rooms.get(code) else { return };
            let VoteState::Resolving(vote) = &room.active_vote else {
                tracing::warn!("resolve_active_vote called without a resolving vote in {}", code);
                return;
            };
            (vote.clone(), room.movie.clone(), room.questions_asked.len())
        };

        let approved = vote.yes_count() > vote.no_count();

        let mut answer: Option<String> = None;
        let mut is_correct_guess = false;

        if approved {
            // Clients switch to a waiting indicator while the oracle runs
            self.broadcast_to_room(
                code,
                &ServerMessage::VoteProcessing {
                    vote_kind: vote.kind,
                },
                None,
            )
            .await;

            match vote.kind {
                VoteKind::Question => {
                    answer = Some(
                        self.oracle
                            .answer_question(&movie, &vote.prompt, history_len + 1)
                            .await,
                    );
                }
                VoteKind::Hint => {
                    answer = Some(self.oracle.hint(&movie, history_len).await);
                }
                VoteKind::Guess => {
                    let guess = vote.guess.clone().unwrap_or_default();
                    is_correct_guess = matching::guess_matches(&guess, &movie);
                    answer = Some(if is_correct_guess {
                        format!("🎉 Correct! The movie is \"{}\"!", movie.title)
                    } else {
                        format!("❌ Wrong! \"{}\" is not the movie.", guess)
                    });
                }
                VoteKind::GiveUp => {
                    answer = Some(format!("Game Over! The movie was \"{}\"", movie.title));
                }
            }
        }

        let Some(resolution) = self
            .apply_resolution(code, &vote, approved, answer, is_correct_guess)
            .await
        else {
            // Room vanished while the oracle was running
            return;
        };

        self.broadcast_resolution(code, &vote, &movie, resolution)
            .await;
    }

    /// Append the history entry and apply the end-of-round consequences
    /// atomically, clearing the vote slot.
    async fn apply_resolution(
        &self,
        code: &str,
        vote: &Vote,
        approved: bool,
        answer: Option<String>,
        is_correct_guess: bool,
    ) -> Option<Resolution> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code)?;

        // Commit only if the slot still holds this vote; if anything cleared
        // it while the oracle was running, the result must not land in a
        // round it no longer belongs to.
        let still_resolving = matches!(
            &room.active_vote,
            VoteState::Resolving(current)
                if current.proposed_by == vote.proposed_by
                    && current.started_at == vote.started_at
        );
        if !still_resolving {
            tracing::warn!("Vote slot changed during resolution in {}, discarding result", code);
            return None;
        }

        // Voter name lists follow roster order, not ballot insertion order
        let mut yes_voters = Vec::new();
        let mut no_voters = Vec::new();
        for player in &room.players {
            match vote.ballots.get(&player.id) {
                Some(Ballot::Yes) => yes_voters.push(player.name.clone()),
                Some(Ballot::No) => no_voters.push(player.name.clone()),
                None => {}
            }
        }

        let entry = HistoryEntry {
            kind: vote.kind,
            prompt: vote.prompt.clone(),
            guess: vote.guess.clone(),
            proposed_by_name: vote.proposed_by_name.clone(),
            ballots: vote.ballots.clone(),
            yes_voters,
            no_voters,
            result: if approved {
                VoteResult::Approved
            } else {
                VoteResult::Rejected
            },
            answer,
            is_correct_guess: (approved && vote.kind == VoteKind::Guess)
                .then_some(is_correct_guess),
            timestamp: Utc::now(),
        };

        room.questions_asked.push(entry.clone());
        room.active_vote = VoteState::Idle;

        let mut winner = None;
        if approved && vote.kind == VoteKind::Guess && is_correct_guess {
            room.game_over = true;
            if let Some(player) = room.player_mut(&vote.proposed_by) {
                player.wins += 1;
                winner = Some(player.clone());
            }
        }
        if approved && vote.kind == VoteKind::GiveUp {
            room.game_over = true;
        }

        let questions_used = room.questions_used(&self.config);
        let mut budget_exhausted = false;
        if questions_used >= self.config.question_budget && !room.game_over {
            room.game_over = true;
            budget_exhausted = true;
        }

        tracing::info!(
            "Vote resolved in room {}: {} (used {}/{})",
            code,
            if approved { "approved" } else { "rejected" },
            questions_used,
            self.config.question_budget
        );

        Some(Resolution {
            entry,
            approved,
            is_correct_guess,
            winner,
            questions_count: room.questions_asked.len(),
            questions_used,
            budget_exhausted,
        })
    }

    async fn broadcast_resolution(
        &self,
        code: &str,
        vote: &Vote,
        movie: &Movie,
        resolution: Resolution,
    ) {
        let question = vote
            .guess
            .clone()
            .unwrap_or_else(|| vote.prompt.clone());

        if resolution.approved {
            match vote.kind {
                VoteKind::GiveUp => {
                    self.broadcast_to_room(
                        code,
                        &ServerMessage::GameOver {
                            reason: GameOverReason::GiveUp,
                            movie: movie.clone(),
                            vote_details: Some(resolution.entry.clone()),
                        },
                        None,
                    )
                    .await;
                }
                VoteKind::Guess if resolution.is_correct_guess => {
                    // A proposer who left mid-resolution still wins on record
                    let winner = resolution.winner.unwrap_or_else(|| {
                        Player::new(
                            vote.proposed_by.clone(),
                            vote.proposed_by_name.clone(),
                            None,
                            false,
                        )
                    });
                    self.broadcast_to_room(
                        code,
                        &ServerMessage::GameWon {
                            winner,
                            movie: movie.clone(),
                            questions_used: resolution.questions_used,
                            vote_details: resolution.entry.clone(),
                        },
                        None,
                    )
                    .await;
                }
                _ => {
                    self.broadcast_to_room(
                        code,
                        &ServerMessage::QuestionAnswered {
                            question,
                            answer: resolution
                                .entry
                                .answer
                                .clone()
                                .unwrap_or_default(),
                            questions_count: resolution.questions_count,
                            questions_used: resolution.questions_used,
                            vote_details: resolution.entry.clone(),
                        },
                        None,
                    )
                    .await;
                }
            }
        } else {
            self.broadcast_to_room(
                code,
                &ServerMessage::VoteRejected {
                    question,
                    vote_details: resolution.entry.clone(),
                },
                None,
            )
            .await;
        }

        if resolution.budget_exhausted {
            self.broadcast_to_room(
                code,
                &ServerMessage::GameOver {
                    reason: GameOverReason::MaxQuestions,
                    movie: movie.clone(),
                    vote_details: None,
                },
                None,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::sync::atomic::Ordering;

    async fn pending_vote(state: &AppState, code: &str) -> Option<Vote> {
        let rooms = state.rooms.read().await;
        match &rooms.get(code)?.active_vote {
            VoteState::Pending(v) => Some(v.clone()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_propose_prefills_proposer_yes() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        let vote = state
            .start_vote(
                &code,
                &ids[0],
                VoteProposal::Question {
                    text: "Is it scary?".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(vote.kind, VoteKind::Question);
        assert_eq!(vote.ballots.get(&ids[0]), Some(&Ballot::Yes));
        assert_eq!(vote.ballots.len(), 1);
    }

    #[tokio::test]
    async fn test_second_proposal_rejected_while_active() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        state
            .start_vote(&code, &ids[0], VoteProposal::Hint)
            .await
            .unwrap();
        let result = state
            .start_vote(&code, &ids[1], VoteProposal::GiveUp)
            .await;
        assert!(matches!(result, Err(GameError::VoteAlreadyActive)));
    }

    #[tokio::test]
    async fn test_ballot_is_idempotent_last_wins() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob", "Carol"]).await;

        state
            .start_vote(&code, &ids[0], VoteProposal::Hint)
            .await
            .unwrap();

        state.cast_ballot(&code, &ids[1], Ballot::Yes).await.unwrap();
        let update = state
            .cast_ballot(&code, &ids[1], Ballot::No)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(update.votes_count, 2, "re-vote must not add a ballot");
        assert_eq!(update.vote.ballots.get(&ids[1]), Some(&Ballot::No));
        assert!(!update.quorum_reached);
    }

    #[tokio::test]
    async fn test_quorum_exactly_at_full_participation() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob", "Carol"]).await;

        state
            .start_vote(&code, &ids[0], VoteProposal::Hint)
            .await
            .unwrap();

        let update = state
            .cast_ballot(&code, &ids[1], Ballot::Yes)
            .await
            .unwrap()
            .unwrap();
        assert!(!update.quorum_reached, "2 of 3 is not quorum");

        let update = state
            .cast_ballot(&code, &ids[2], Ballot::Yes)
            .await
            .unwrap()
            .unwrap();
        assert!(update.quorum_reached);

        // Slot is immediately claimed for resolution
        assert!(pending_vote(&state, &code).await.is_none());
        let rooms = state.rooms.read().await;
        assert!(matches!(
            rooms.get(&code).unwrap().active_vote,
            VoteState::Resolving(_)
        ));
    }

    #[tokio::test]
    async fn test_ballots_ignored_when_idle_or_resolving() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        // No vote open
        assert!(state
            .cast_ballot(&code, &ids[0], Ballot::Yes)
            .await
            .unwrap()
            .is_none());

        state
            .start_vote(&code, &ids[0], VoteProposal::Hint)
            .await
            .unwrap();
        let update = state
            .cast_ballot(&code, &ids[1], Ballot::Yes)
            .await
            .unwrap()
            .unwrap();
        assert!(update.quorum_reached);

        // Resolving: further ballots are dropped
        assert!(state
            .cast_ballot(&code, &ids[1], Ballot::No)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cancel_only_by_proposer_and_only_pending() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        // Nothing to cancel yet
        assert!(!state.cancel_vote(&code, &ids[0]).await.unwrap());

        state
            .start_vote(&code, &ids[0], VoteProposal::Hint)
            .await
            .unwrap();

        let result = state.cancel_vote(&code, &ids[1]).await;
        assert!(matches!(result, Err(GameError::NotProposer)));

        assert!(state.cancel_vote(&code, &ids[0]).await.unwrap());
        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert!(room.active_vote.is_idle());
        assert!(room.questions_asked.is_empty(), "cancellation leaves no history");
    }

    #[tokio::test]
    async fn test_approved_question_invokes_oracle_and_appends_history() {
        let (state, oracle) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        state
            .start_vote(
                &code,
                &ids[0],
                VoteProposal::Question {
                    text: "Is it set in space?".to_string(),
                },
            )
            .await
            .unwrap();
        let update = state
            .cast_ballot(&code, &ids[1], Ballot::Yes)
            .await
            .unwrap()
            .unwrap();
        assert!(update.quorum_reached);

        state.resolve_active_vote(&code).await;

        assert_eq!(oracle.answer_calls.load(Ordering::SeqCst), 1);
        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert!(room.active_vote.is_idle());
        assert_eq!(room.questions_asked.len(), 1);

        let entry = &room.questions_asked[0];
        assert_eq!(entry.result, VoteResult::Approved);
        assert_eq!(entry.yes_voters, vec!["Alice", "Bob"]);
        assert!(entry.answer.as_deref().unwrap().contains("Is it set in space?"));
        assert!(!room.game_over);
    }

    #[tokio::test]
    async fn test_tie_rejects_without_oracle_call() {
        let (state, oracle) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        state
            .start_vote(
                &code,
                &ids[0],
                VoteProposal::Question {
                    text: "Q?".to_string(),
                },
            )
            .await
            .unwrap();
        state.cast_ballot(&code, &ids[1], Ballot::No).await.unwrap();
        state.resolve_active_vote(&code).await;

        assert_eq!(oracle.answer_calls.load(Ordering::SeqCst), 0);
        let rooms = state.rooms.read().await;
        let entry = &rooms.get(&code).unwrap().questions_asked[0];
        assert_eq!(entry.result, VoteResult::Rejected);
        assert!(entry.answer.is_none());
    }

    #[tokio::test]
    async fn test_correct_guess_ends_round_and_counts_win() {
        let (state, _) = state_with_movie("The Matrix");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        state
            .start_vote(
                &code,
                &ids[1],
                VoteProposal::Guess {
                    text: "the matrix".to_string(),
                },
            )
            .await
            .unwrap();
        state.cast_ballot(&code, &ids[0], Ballot::Yes).await.unwrap();
        state.resolve_active_vote(&code).await;

        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert!(room.game_over);
        assert_eq!(room.player(&ids[1]).unwrap().wins, 1);
        assert_eq!(room.questions_asked[0].is_correct_guess, Some(true));
    }

    #[tokio::test]
    async fn test_wrong_guess_consumes_budget_but_continues() {
        let (state, _) = state_with_movie("The Matrix");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        state
            .start_vote(
                &code,
                &ids[1],
                VoteProposal::Guess {
                    text: "Inception".to_string(),
                },
            )
            .await
            .unwrap();
        state.cast_ballot(&code, &ids[0], Ballot::Yes).await.unwrap();
        state.resolve_active_vote(&code).await;

        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert!(!room.game_over);
        assert_eq!(room.player(&ids[1]).unwrap().wins, 0);
        assert_eq!(room.questions_asked[0].is_correct_guess, Some(false));
        assert_eq!(room.questions_used(&state.config), 1);
    }

    #[tokio::test]
    async fn test_give_up_ends_round_without_oracle() {
        let (state, oracle) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        state
            .start_vote(&code, &ids[0], VoteProposal::GiveUp)
            .await
            .unwrap();
        state.cast_ballot(&code, &ids[1], Ballot::Yes).await.unwrap();
        state.resolve_active_vote(&code).await;

        assert_eq!(oracle.answer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(oracle.hint_calls.load(Ordering::SeqCst), 0);
        let rooms = state.rooms.read().await;
        assert!(rooms.get(&code).unwrap().game_over);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_ends_round() {
        let oracle = std::sync::Arc::new(MockOracle::new(crate::types::test_movie("Alien")));
        let config = GameConfig {
            question_budget: 2,
            ..GameConfig::default()
        };
        let state = AppState::with_config(oracle, config);
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;

        for question in ["Q1?", "Q2?"] {
            state
                .start_vote(
                    &code,
                    &ids[0],
                    VoteProposal::Question {
                        text: question.to_string(),
                    },
                )
                .await
                .unwrap();
            state.cast_ballot(&code, &ids[1], Ballot::Yes).await.unwrap();
            state.resolve_active_vote(&code).await;
        }

        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert_eq!(room.questions_used(&state.config), 2);
        assert!(room.game_over, "budget ceiling ends the round");
    }

    /// Oracle double whose answers take a while, for exercising what may and
    /// may not happen while a resolution is in flight.
    struct SlowOracle {
        movie: Movie,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl crate::oracle::MovieOracle for SlowOracle {
        async fn fetch_movie(
            &self,
            _category_params: &HashMap<String, String>,
        ) -> crate::oracle::OracleResult<Movie> {
            Ok(self.movie.clone())
        }

        async fn answer_question(&self, _movie: &Movie, _question: &str, _n: usize) -> String {
            tokio::time::sleep(self.delay).await;
            "slow answer".to_string()
        }

        async fn hint(&self, _movie: &Movie, _questions_asked: usize) -> String {
            "slow hint".to_string()
        }
    }

    async fn resolving_with_slow_oracle() -> (AppState, RoomCode, Vec<PlayerId>) {
        let state = AppState::new(std::sync::Arc::new(SlowOracle {
            movie: crate::types::test_movie("Alien"),
            delay: std::time::Duration::from_millis(100),
        }));
        let (code, ids) = room_with_players(&state, &["Alice", "Bob"]).await;
        state
            .start_vote(
                &code,
                &ids[0],
                VoteProposal::Question {
                    text: "Q?".to_string(),
                },
            )
            .await
            .unwrap();
        let update = state
            .cast_ballot(&code, &ids[1], Ballot::Yes)
            .await
            .unwrap()
            .unwrap();
        assert!(update.quorum_reached);
        (state, code, ids)
    }

    #[tokio::test]
    async fn test_round_swap_rejected_during_resolution() {
        let (state, code, ids) = resolving_with_slow_oracle().await;

        let resolver = {
            let state = state.clone();
            let code = code.clone();
            tokio::spawn(async move { state.resolve_active_vote(&code).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The host cannot swap the movie out from under the resolution
        let result = state.next_movie(&code, &ids[0]).await;
        assert!(matches!(result, Err(GameError::RoundNotOver)));

        resolver.await.unwrap();
        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert!(room.active_vote.is_idle());
        assert_eq!(room.questions_asked.len(), 1);
        assert_eq!(
            room.questions_asked[0].answer.as_deref(),
            Some("slow answer")
        );
    }

    #[tokio::test]
    async fn test_stale_resolution_discarded_when_slot_cleared() {
        let (state, code, _ids) = resolving_with_slow_oracle().await;

        let resolver = {
            let state = state.clone();
            let code = code.clone();
            tokio::spawn(async move { state.resolve_active_vote(&code).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Something clears the slot and history while the oracle is still
        // running; the in-flight result must not land in the fresh round.
        {
            let mut rooms = state.rooms.write().await;
            let room = rooms.get_mut(&code).unwrap();
            room.active_vote = VoteState::Idle;
            room.questions_asked.clear();
        }

        resolver.await.unwrap();
        let rooms = state.rooms.read().await;
        let room = rooms.get(&code).unwrap();
        assert!(
            room.questions_asked.is_empty(),
            "stale resolution must not pollute the reset round"
        );
        assert!(!room.game_over);
        assert!(room.active_vote.is_idle());
    }

    #[tokio::test]
    async fn test_random_interleaving_keeps_single_vote_slot() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob", "Carol"]).await;
        let mut rng = StdRng::seed_from_u64(0x5EED);

        // Shadow model of the slot: the pending proposer, if any
        let mut open: Option<PlayerId> = None;

        for step in 0..200 {
            let who = ids[rng.random_range(0..ids.len())].clone();
            match rng.random_range(0..3) {
                0 => {
                    let result = state
                        .start_vote(
                            &code,
                            &who,
                            VoteProposal::Question {
                                text: format!("Q{}?", step),
                            },
                        )
                        .await;
                    match (&open, &result) {
                        (None, Ok(_)) => open = Some(who),
                        (Some(_), Err(GameError::VoteAlreadyActive)) => {}
                        _ => panic!("propose violated the slot invariant at step {}", step),
                    }
                }
                1 => {
                    let ballot = if rng.random_bool(0.5) {
                        Ballot::Yes
                    } else {
                        Ballot::No
                    };
                    let update = state.cast_ballot(&code, &who, ballot).await.unwrap();
                    match (&open, &update) {
                        (None, None) => {}
                        (Some(_), Some(u)) => {
                            if u.quorum_reached {
                                state.resolve_active_vote(&code).await;
                                open = None;
                            }
                        }
                        _ => panic!("ballot violated the slot invariant at step {}", step),
                    }
                }
                _ => {
                    let result = state.cancel_vote(&code, &who).await;
                    match (&open, result) {
                        (Some(p), Ok(true)) if *p == who => open = None,
                        (Some(p), Err(GameError::NotProposer)) if *p != who => {}
                        (None, Ok(false)) => {}
                        _ => panic!("cancel violated the slot invariant at step {}", step),
                    }
                }
            }

            // The slot must agree with the model after every invocation
            let rooms = state.rooms.read().await;
            let room = rooms.get(&code).unwrap();
            match (&open, &room.active_vote) {
                (None, VoteState::Idle) => {}
                (Some(p), VoteState::Pending(v)) if v.proposed_by == *p => {}
                _ => panic!("vote slot diverged from the model at step {}", step),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_proposals_admit_exactly_one() {
        let (state, _) = state_with_movie("Alien");
        let (code, ids) = room_with_players(&state, &["Alice", "Bob", "Carol"]).await;

        let mut handles = Vec::new();
        for id in &ids {
            for n in 0..10 {
                let state = state.clone();
                let code = code.clone();
                let id = id.clone();
                handles.push(tokio::spawn(async move {
                    state
                        .start_vote(
                            &code,
                            &id,
                            VoteProposal::Question {
                                text: format!("Q{}?", n),
                            },
                        )
                        .await
                        .is_ok()
                }));
            }
        }

        let admitted = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);

        let rooms = state.rooms.read().await;
        assert!(matches!(
            rooms.get(&code).unwrap().active_vote,
            VoteState::Pending(_)
        ));
    }
}
